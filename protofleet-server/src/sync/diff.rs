//! Manifest resolution against the catalog.
//!
//! Records are resolved strictly in manifest order, one lookup at a time:
//! the order is the subscriber's delivery priority and batches must
//! preserve it.

use bytes::Bytes;
use protofleet_core::protocol::BatchEntry;
use protofleet_core::{Manifest, ManifestRecord};
use std::sync::Arc;
use tracing::warn;

use super::catalog::Catalog;
use super::fleet::Fleet;

/// Resolution of a single manifest record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Missing(String),
    Fetched { content: Bytes, digest: String },
    UpToDate,
}

impl From<Outcome> for BatchEntry {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Missing(error) => BatchEntry::error(error),
            Outcome::Fetched { content, digest } => BatchEntry::file(content, digest),
            Outcome::UpToDate => BatchEntry::up_to_date(),
        }
    }
}

#[derive(Clone)]
pub struct DiffEngine {
    catalog: Arc<dyn Catalog>,
}

impl DiffEngine {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    pub async fn resolve_one(&self, record: &ManifestRecord) -> Outcome {
        let path = record.path.as_str();

        if !self.catalog.exists(path).await {
            return Outcome::Missing(format!("file {} not exists.", path));
        }

        if self.catalog.is_current(path, &record.tag).await {
            return Outcome::UpToDate;
        }

        match self.catalog.fetch(path).await {
            Ok((content, digest)) => Outcome::Fetched { content, digest },
            Err(e) => {
                warn!(path = %path, "Failed to read artifact: {}", e);
                Outcome::Missing(e.to_string())
            }
        }
    }

    pub async fn resolve(&self, manifest: &Manifest) -> Vec<(String, Outcome)> {
        let mut outcomes = Vec::with_capacity(manifest.len());
        for record in manifest.records() {
            let outcome = self.resolve_one(record).await;
            outcomes.push((record.path.clone(), outcome));
        }
        outcomes
    }

    /// Resolve `manifest` and load each outcome into `fleet` as soon as it is
    /// known, flagging the last record of the pass.
    pub async fn resolve_into(&self, manifest: &Manifest, fleet: &Fleet) {
        let last = manifest.len().saturating_sub(1);
        for (i, record) in manifest.records().iter().enumerate() {
            let outcome = self.resolve_one(record).await;
            fleet.load(&record.path, outcome, i == last).await;
        }
    }
}
