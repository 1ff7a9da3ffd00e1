//! Configuration management for the agent.
//!
//! Loaded from a TOML file; every section and field falls back to its
//! default when absent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::errors::{AgentError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server base URL; the watch stream URL is derived from it
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Local directory mirrored from the server
    pub root: PathBuf,

    /// Extension picked up when indexing the root (empty = every file)
    pub extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Entries per batch requested from the server
    pub batch_size: u32,

    /// Fail a pull when any of its entries carries an error
    pub strict: bool,

    /// Manifest file to pull; the local ledger's manifest is used when unset
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:50052".to_string(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("protos"),
            extension: "proto".to_string(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            strict: false,
            manifest: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| AgentError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// WebSocket URL of the watch stream.
    pub fn watch_url(&self) -> String {
        let base = self
            .server
            .url
            .trim_end_matches('/')
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/ws/watch", base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.url, "http://localhost:50052");
        assert_eq!(config.watch.batch_size, 10);
        assert!(!config.watch.strict);
        assert!(config.watch.manifest.is_none());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_file() {
        let config = Config::parse(
            r#"
            [server]
            url = "https://schemas.internal:8443/"

            [watch]
            strict = true
            "#,
        )
        .unwrap();

        assert!(config.watch.strict);
        assert_eq!(config.watch.batch_size, 10);
        assert_eq!(config.ledger.root, PathBuf::from("protos"));
        assert_eq!(config.watch_url(), "wss://schemas.internal:8443/ws/watch");
    }

    #[test]
    fn test_from_file_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[watch]\nbatch_size = \"many\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, AgentError::Config(ref msg) if msg.contains("agent.toml")));
    }
}
