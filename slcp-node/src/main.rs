// SLCP node: discovery, UDP control and TCP image transport with an interactive front end.

mod cli;
mod config;
mod discovery;
mod engine;
mod images;
mod net;
mod transport;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use slcp_core::{Message, Request};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "slcp-node", version, about = "Local-network chat over SLCP")]
struct Args {
    /// Config file (default: ~/.config/slcp/config.toml, then /etc/slcp/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Chat handle
    #[arg(long)]
    handle: Option<String>,
    /// UDP control and TCP image port
    #[arg(short, long)]
    port: Option<u16>,
    /// Shared discovery port
    #[arg(long)]
    whoisport: Option<u16>,
    /// Away message sent while not joined
    #[arg(long)]
    autoreply: Option<String>,
    /// Directory for received images
    #[arg(long)]
    imagepath: Option<PathBuf>,
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(self, c: &mut config::Config) {
        if let Some(h) = self.handle {
            c.handle = h;
        }
        if let Some(p) = self.port {
            c.port = p;
        }
        if let Some(p) = self.whoisport {
            c.whoisport = p;
        }
        if let Some(a) = self.autoreply {
            c.autoreply = Some(a);
        }
        if let Some(p) = self.imagepath {
            c.imagepath = p;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "slcp_node=debug" } else { "slcp_node=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut cfg = config::load(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;
    tracing::debug!(?cfg, "configuration");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let engine_cfg = engine::EngineConfig::from_config(&cfg, net::own_ip());
        let mut engine = engine::start(engine_cfg)
            .await
            .with_context(|| format!("binding ports {} / {}", cfg.port, cfg.whoisport))?;

        let result = tokio::select! {
            r = cli::run(&mut engine, &cfg) => r,
            r = shutdown_signal() => {
                tracing::info!("shutdown signal received");
                r
            }
        };
        if engine.is_joined().await {
            engine.send(Request::Broadcast(Message::leave(&cfg.handle)));
        }
        engine.shutdown().await;
        result
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
