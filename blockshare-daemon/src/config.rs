//! Load config from file and environment.

use blockshare_core::IndexEndpoint;
use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/blockshare/config.toml or /etc/blockshare/config.toml.
/// Env overrides: BLOCKSHARE_LISTEN_PORT, BLOCKSHARE_BASEDIR, BLOCKSHARE_DOWNLOAD_DIR,
/// BLOCKSHARE_INDEX_HOST, BLOCKSHARE_INDEX_PORT, BLOCKSHARE_INDEX_SECRET.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Upload server port (default 3201).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Directory shared files live under (default ".").
    #[serde(default = "default_basedir")]
    pub basedir: PathBuf,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Greeting sent to connecting peers.
    #[serde(default = "default_welcome")]
    pub welcome: String,
    #[serde(default)]
    pub index: Option<IndexEndpoint>,
    /// Files to share at startup.
    #[serde(default, rename = "share")]
    pub shares: Vec<ShareConfig>,
    #[serde(default)]
    pub transfer: blockshare_core::Config,
}

/// One `[[share]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareConfig {
    /// Path relative to `basedir`.
    pub path: String,
    pub secret: String,
}

fn default_listen_port() -> u16 {
    3201
}
fn default_basedir() -> PathBuf {
    PathBuf::from(".")
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}
fn default_welcome() -> String {
    blockshare_core::upload::DEFAULT_WELCOME.to_string()
}
fn default_index_port() -> u16 {
    3200
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            basedir: default_basedir(),
            download_dir: default_download_dir(),
            welcome: default_welcome(),
            index: None,
            shares: Vec::new(),
            transfer: blockshare_core::Config::default(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("BLOCKSHARE_LISTEN_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.listen_port = p;
    }
    if let Some(s) = var("BLOCKSHARE_BASEDIR") {
        c.basedir = PathBuf::from(s);
    }
    if let Some(s) = var("BLOCKSHARE_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(s);
    }
    let host = var("BLOCKSHARE_INDEX_HOST");
    let port = var("BLOCKSHARE_INDEX_PORT").and_then(|s| s.parse::<u16>().ok());
    let secret = var("BLOCKSHARE_INDEX_SECRET");
    if host.is_none() && port.is_none() && secret.is_none() {
        return;
    }
    let index = c.index.get_or_insert_with(|| IndexEndpoint {
        host: "127.0.0.1".to_string(),
        port: default_index_port(),
        secret: String::new(),
    });
    if let Some(h) = host {
        index.host = h;
    }
    if let Some(p) = port {
        index.port = p;
    }
    if let Some(s) = secret {
        index.secret = s;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/blockshare/config.toml"));
    }
    out.push(PathBuf::from("/etc/blockshare/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p).map(|s| toml::from_str::<Config>(&s)) {
                Ok(Ok(c)) => return Some(c),
                Ok(Err(e)) => tracing::warn!(path = %p.display(), error = %e, "ignoring invalid config"),
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config"),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn full_file_parses() {
        let c: Config = toml::from_str(
            r#"
            listen_port = 4000
            basedir = "/srv/share"
            download_dir = "/srv/incoming"

            [index]
            host = "index.example"
            port = 3200
            secret = "idx"

            [[share]]
            path = "docs/a.pdf"
            secret = "one"

            [[share]]
            path = "b.iso"
            secret = "two"

            [transfer]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(c.listen_port, 4000);
        assert_eq!(c.index.as_ref().unwrap().host, "index.example");
        assert_eq!(c.shares.len(), 2);
        assert_eq!(c.shares[1].path, "b.iso");
        assert_eq!(c.transfer.max_retries, 5);
        assert_eq!(c.transfer.write_backlog, 5);
    }

    #[test]
    fn empty_file_is_default() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.listen_port, 3201);
        assert!(c.index.is_none());
        assert!(c.shares.is_empty());
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 1").is_err());
    }

    #[test]
    fn env_overrides_create_index() {
        let env: HashMap<&str, &str> = [
            ("BLOCKSHARE_LISTEN_PORT", "5555"),
            ("BLOCKSHARE_INDEX_HOST", "10.1.1.1"),
            ("BLOCKSHARE_INDEX_SECRET", "pw"),
            ("BLOCKSHARE_INDEX_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.listen_port, 5555);
        let index = c.index.unwrap();
        assert_eq!(index.host, "10.1.1.1");
        assert_eq!(index.port, 3200);
        assert_eq!(index.secret, "pw");
    }
}
