//! Protofleet Core
//!
//! Shared building blocks for the schema distribution server and its agents:
//! the content-addressed ledger, manifest parsing, and the wire protocol.

pub mod digest;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod protocol;
pub mod walker;

// Re-export commonly used types
pub use digest::digest;
pub use error::LedgerError;
pub use ledger::{Entry, Ledger, SNAPSHOT_FILE};
pub use manifest::{Manifest, ManifestRecord};
pub type Result<T> = std::result::Result<T, LedgerError>;
