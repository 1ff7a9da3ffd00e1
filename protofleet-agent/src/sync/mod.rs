//! One-shot sync flows over the unary endpoints.
//!
//! - `fetch`: fetch-through of single artifacts into the local ledger
//! - `upload`: publish local changes to the server

pub mod fetch;
pub mod upload;

pub use fetch::Fetcher;
pub use upload::{UploadSummary, Uploader};
