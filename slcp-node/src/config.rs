//! Load config from file, environment and command line.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use slcp_core::SessionState;

/// Node configuration. File: --config, ~/.config/slcp/config.toml or /etc/slcp/config.toml.
/// Env overrides: SLCP_HANDLE, SLCP_PORT, SLCP_WHOISPORT, SLCP_AUTOREPLY, SLCP_IMAGEPATH.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Chat handle (default: $USER, else "anon").
    #[serde(default = "default_handle")]
    pub handle: String,
    /// Own UDP control + TCP image port (default 5000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared discovery UDP port (default 4000).
    #[serde(default = "default_whoisport")]
    pub whoisport: u16,
    /// Sent to inquirers while not joined.
    #[serde(default)]
    pub autoreply: Option<String>,
    /// Where received images are written (default ./received).
    #[serde(default = "default_imagepath")]
    pub imagepath: PathBuf,
}

fn default_handle() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "anon".to_string())
}
fn default_port() -> u16 {
    5000
}
fn default_whoisport() -> u16 {
    4000
}
fn default_imagepath() -> PathBuf {
    PathBuf::from("received")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handle: default_handle(),
            port: default_port(),
            whoisport: default_whoisport(),
            autoreply: None,
            imagepath: default_imagepath(),
        }
    }
}

impl Config {
    /// Reject settings the node could not act on, such as an autoreply too long for one message.
    pub fn validate(&self) -> anyhow::Result<()> {
        SessionState::new(self.handle.as_str(), self.port)
            .with_autoreply(self.autoreply.clone())
            .context("autoreply")?;
        Ok(())
    }
}

/// Load config: default, then config file (explicit path must exist), then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => parse_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => parse_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str::<Config>(&s).with_context(|| format!("parsing config {}", path.display()))
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/slcp/config.toml"));
    }
    out.push(PathBuf::from("/etc/slcp/config.toml"));
    out
}

/// Unparseable port values are ignored.
fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(h) = var("SLCP_HANDLE").filter(|h| !h.is_empty()) {
        c.handle = h;
    }
    if let Some(p) = var("SLCP_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.port = p;
    }
    if let Some(p) = var("SLCP_WHOISPORT").and_then(|s| s.parse::<u16>().ok()) {
        c.whoisport = p;
    }
    if let Some(a) = var("SLCP_AUTOREPLY") {
        c.autoreply = Some(a);
    }
    if let Some(p) = var("SLCP_IMAGEPATH") {
        c.imagepath = PathBuf::from(p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn file_fields_and_defaults() {
        let c: Config = toml::from_str(
            r#"
            handle = "alice"
            port = 5100
            autoreply = "brb"
            "#,
        )
        .unwrap();
        assert_eq!(c.handle, "alice");
        assert_eq!(c.port, 5100);
        assert_eq!(c.whoisport, 4000);
        assert_eq!(c.autoreply.as_deref(), Some("brb"));
        assert_eq!(c.imagepath, PathBuf::from("received"));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("dark_mode = true").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SLCP_HANDLE", "bob"),
            ("SLCP_PORT", "6000"),
            ("SLCP_WHOISPORT", "not-a-port"),
            ("SLCP_IMAGEPATH", "/tmp/imgs"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.handle, "bob");
        assert_eq!(c.port, 6000);
        assert_eq!(c.whoisport, 4000);
        assert_eq!(c.imagepath, PathBuf::from("/tmp/imgs"));
        assert_eq!(c.autoreply, None);
    }

    #[test]
    fn oversized_autoreply_fails_validation() {
        let mut c = Config {
            handle: "alice".into(),
            ..Config::default()
        };
        c.autoreply = Some("brb".into());
        assert!(c.validate().is_ok());
        c.autoreply = Some("x".repeat(600));
        let err = c.validate().unwrap_err();
        assert!(format!("{err:#}").contains("too long"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let missing = std::env::temp_dir().join("slcp-no-such-config.toml");
        assert!(load(Some(&missing)).is_err());
    }
}
