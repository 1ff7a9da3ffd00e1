use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Ledger root holding the canonical schema files
    pub schema_root: PathBuf,
    /// Extension picked up when indexing the root; empty = every file
    pub schema_extension: String,
    /// Fleet flush delay after the last load
    pub idle_window: Duration,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50052),
            schema_root: PathBuf::from(
                std::env::var("SCHEMA_ROOT").unwrap_or_else(|_| "static/protos".into()),
            ),
            schema_extension: std::env::var("SCHEMA_EXTENSION").unwrap_or_else(|_| "proto".into()),
            idle_window: Duration::from_millis(
                std::env::var("IDLE_WINDOW_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
            ),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
