//! Interactive stdin front end: one command per line, events printed as they arrive.

use std::path::PathBuf;

use slcp_core::{Event, Message, Request};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::images;

const HELP: &str = "\
commands:
  join                         announce yourself and start receiving messages
  leave                        announce departure (autoreply takes over)
  msg <handle> <text>          send a text message
  img <handle> <path> [comment] send an image file
  whois <handle>               ask the network where <handle> is
  autoreply [text]             set the away message; no text clears it
  peers                        list known peers
  help                         this text
  quit                         leave and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Join,
    Leave,
    Msg { to: String, text: String },
    Img { to: String, path: PathBuf, comment: String },
    Whois(String),
    Autoreply(Option<String>),
    Peers,
    Help,
    Quit,
}

/// Blank lines parse to `Ok(None)`. Errors are usage strings for the user.
pub fn parse_command(line: &str) -> Result<Option<CliCommand>, String> {
    let (word, rest) = split_word(line);
    let cmd = match word {
        "" => return Ok(None),
        "join" => CliCommand::Join,
        "leave" => CliCommand::Leave,
        "msg" => {
            let (to, text) = split_word(rest);
            if to.is_empty() || text.is_empty() {
                return Err("usage: msg <handle> <text>".into());
            }
            CliCommand::Msg {
                to: to.to_string(),
                text: text.to_string(),
            }
        }
        "img" => {
            let (to, rest) = split_word(rest);
            let (path, comment) = split_word(rest);
            if to.is_empty() || path.is_empty() {
                return Err("usage: img <handle> <path> [comment]".into());
            }
            CliCommand::Img {
                to: to.to_string(),
                path: PathBuf::from(path),
                comment: comment.to_string(),
            }
        }
        "whois" => {
            let (handle, _) = split_word(rest);
            if handle.is_empty() {
                return Err("usage: whois <handle>".into());
            }
            CliCommand::Whois(handle.to_string())
        }
        "autoreply" => CliCommand::Autoreply(Some(rest.to_string()).filter(|t| !t.is_empty())),
        "peers" => CliCommand::Peers,
        "help" | "?" => CliCommand::Help,
        "quit" | "exit" => CliCommand::Quit,
        other => return Err(format!("unknown command '{}', try help", other)),
    };
    Ok(Some(cmd))
}

/// First whitespace-delimited word and the trimmed remainder.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// Run until `quit`, end of input, or the engine stops.
pub async fn run(engine: &mut EngineHandle, cfg: &Config) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{} on port {} (type help)", cfg.handle, engine.local_port());
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Some(CliCommand::Quit)) => break,
                    Ok(Some(cmd)) => execute(engine, cfg, cmd).await,
                    Ok(None) => {}
                    Err(usage) => println!("{}", usage),
                }
            }
            ev = engine.next_event() => match ev {
                Some(ev) => show_event(cfg, ev).await,
                None => break,
            },
        }
    }
    Ok(())
}

async fn execute(engine: &EngineHandle, cfg: &Config, cmd: CliCommand) {
    let req = match cmd {
        CliCommand::Join => Request::Broadcast(Message::join(&cfg.handle, engine.local_port())),
        CliCommand::Leave => Request::Broadcast(Message::leave(&cfg.handle)),
        CliCommand::Msg { to, text } => Request::DirectText { to, text },
        CliCommand::Img { to, path, comment } => match images::read_image(&path).await {
            Ok(bytes) => Request::DirectImage { to, bytes, comment },
            Err(e) => {
                println!("cannot read {}: {}", path.display(), e);
                return;
            }
        },
        CliCommand::Whois(handle) => Request::Whois { handle },
        CliCommand::Autoreply(text) => {
            match &text {
                Some(t) => println!("autoreply set: {}", t),
                None => println!("autoreply cleared"),
            }
            Request::SetAutoreply(text)
        }
        CliCommand::Peers => {
            let peers = engine.peers().await;
            if peers.is_empty() {
                println!("no known peers");
            }
            for p in peers {
                let state = if p.online { "online" } else { "offline" };
                println!("  {:<16} {:<22} {}", p.handle, p.addr, state);
            }
            return;
        }
        CliCommand::Help => {
            println!("{}", HELP);
            return;
        }
        CliCommand::Quit => return,
    };
    if !engine.send(req) {
        println!("engine stopped");
    }
}

async fn show_event(cfg: &Config, ev: Event) {
    match ev {
        Event::Text { from, text } => println!("<{}> {}", from, text),
        Event::Image {
            from,
            bytes,
            comment,
            incomplete,
        } => {
            if let Some(e) = &incomplete {
                println!("image from {} incomplete: {}", from, e);
            }
            match images::save_image(&cfg.imagepath, &from, &bytes, incomplete.is_some()).await {
                Ok(path) => println!("<{}> image {} ({} bytes) {}", from, path.display(), bytes.len(), comment),
                Err(e) => {
                    tracing::warn!("saving image from {} failed: {}", from, e);
                    println!("image from {} could not be saved: {}", from, e);
                }
            }
        }
        Event::PeerDiscovered { handle, addr } => println!("* {} is at {}", handle, addr),
        Event::PeerLeft { handle } => println!("* {} left", handle),
        Event::Failed(e) => println!("! {}", e),
    }
}
