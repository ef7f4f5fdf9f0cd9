//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rumble_core::NetworkConfig;
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/rumble/config.toml or /etc/rumble/config.toml.
/// Env overrides: RUMBLE_TCP_PORT, RUMBLE_DISCOVERY_PORT, RUMBLE_AUTHOR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name attached to posted statuses and chat lines.
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub network: NetworkConfig,
}

fn default_author() -> String {
    "anonymous".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            author: default_author(),
            network: NetworkConfig::default(),
        }
    }
}

/// Load config: explicit path if given, else the first default path that
/// exists, else defaults. Env vars are applied last.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let mut c = match explicit {
        Some(path) => load_file(path)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => load_file(&path)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |key| std::env::var(key).ok())?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/rumble/config.toml"));
    }
    out.push(PathBuf::from("/etc/rumble/config.toml"));
    out
}

pub fn load_file(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parse config {}", path.display()))
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(s) = var("RUMBLE_TCP_PORT") {
        c.network.tcp_port = s.parse().context("RUMBLE_TCP_PORT")?;
    }
    if let Some(s) = var("RUMBLE_DISCOVERY_PORT") {
        c.network.discovery_port = s.parse().context("RUMBLE_DISCOVERY_PORT")?;
    }
    if let Some(s) = var("RUMBLE_AUTHOR") {
        c.author = s;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "author = \"mira\"\n\n[network]\ntcp_port = 8000\nenable_firechat = false").unwrap();
        let c = load_file(f.path()).unwrap();
        assert_eq!(c.author, "mira");
        assert_eq!(c.network.tcp_port, 8000);
        assert!(!c.network.enable_firechat);
        assert_eq!(c.network.discovery_port, 7964);
        assert_eq!(c.network.dispatch_queue_capacity, 10);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[network]\nproxy_port = 3128").unwrap();
        assert!(load_file(f.path()).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn env_overrides_file() {
        let vars: HashMap<&str, &str> = [("RUMBLE_TCP_PORT", "9100"), ("RUMBLE_AUTHOR", "kit")]
            .into_iter()
            .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.network.tcp_port, 9100);
        assert_eq!(c.network.discovery_port, 7964);
        assert_eq!(c.author, "kit");
    }

    #[test]
    fn bad_port_in_env_is_an_error() {
        let mut c = Config::default();
        assert!(apply_env(&mut c, |k| (k == "RUMBLE_DISCOVERY_PORT").then(|| "lots".to_string())).is_err());
    }
}
