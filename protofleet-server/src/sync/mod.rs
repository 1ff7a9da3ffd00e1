//! Server side of the synchronization protocol.
//!
//! - `catalog`: the capabilities the resolver needs from the ledger
//! - `diff`: resolves a manifest into ordered outcomes
//! - `fleet`: per-pass batch accumulator with idle-timer flushing
//! - `registry`: live subscribers, pull passes and push fan-out

pub mod catalog;
pub mod diff;
pub mod fleet;
pub mod registry;

pub use catalog::Catalog;
pub use diff::{DiffEngine, Outcome};
pub use fleet::Fleet;
pub use registry::{Published, SubscriptionRegistry};

use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("unknown subscriber {0}")]
    UnknownSubscriber(Uuid),
}
