//! Utility modules for the agent.

pub mod errors;
pub mod logger;

pub use errors::{AgentError, Result};
