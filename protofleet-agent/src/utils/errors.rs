//! Error types for the agent.

use protofleet_core::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote error: {0}")]
    Remote(String),

    /// An entry of a pull batch carried an error (strict mode)
    #[error("{path}: {message}")]
    Entry { path: String, message: String },

    #[error("Watch stream closed")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, AgentError>;
