//! protofleet agent library
//!
//! Keeps a local schema ledger in step with a protofleet server: batched
//! pulls and server pushes over one watch stream, plus fetch, verify and
//! upload over HTTP.

pub mod config;
pub mod pull;
pub mod remote;
pub mod sync;
pub mod utils;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use pull::PullMultiplexer;
pub use remote::SchemaClient;
pub use utils::errors::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
