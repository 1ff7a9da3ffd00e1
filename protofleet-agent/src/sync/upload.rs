use protofleet_core::protocol::{UploadChunk, UploadFile};
use protofleet_core::Ledger;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::remote::SchemaClient;
use crate::utils::errors::{AgentError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub success: usize,
    pub update: usize,
    /// Artifacts the server already had
    pub skipped: usize,
    pub errors: BTreeMap<String, String>,
}

/// Publishes the local ledger to the server.
pub struct Uploader {
    ledger: Arc<Ledger>,
    client: SchemaClient,
}

impl Uploader {
    pub fn new(ledger: Arc<Ledger>, client: SchemaClient) -> Self {
        Self { ledger, client }
    }

    /// Rescan the local root, ask the server which artifacts differ and
    /// upload those, one chunk per artifact.
    pub async fn upload(&self) -> Result<UploadSummary> {
        let indexed = self.ledger.reindex().await?;
        let manifest = self.ledger.manifest().await;
        info!("Comparing {} local artifact(s) with the server", indexed);

        let report = self.client.compare(&manifest.render()).await?;
        if !report.errors.is_empty() {
            for (path, message) in &report.errors {
                error!(path = %path, "{}", message);
            }
            let message = report
                .errors
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(AgentError::Remote(message));
        }

        let outgoing: Vec<String> = report
            .unmatched
            .into_iter()
            .chain(report.additional)
            .collect();
        if outgoing.is_empty() {
            info!("Server is up to date ({} artifact(s))", report.matched);
            return Ok(UploadSummary {
                skipped: report.matched,
                ..Default::default()
            });
        }

        let mut chunks = Vec::with_capacity(outgoing.len());
        for path in outgoing {
            let entry = self.ledger.get(&path).await?;
            let mut entries = BTreeMap::new();
            entries.insert(
                path,
                UploadFile {
                    content: entry.content,
                    digest: Some(entry.digest),
                },
            );
            chunks.push(UploadChunk { entries });
        }

        info!("Uploading {} artifact(s)", chunks.len());
        let uploaded = self.client.upload(chunks).await?;
        Ok(UploadSummary {
            success: uploaded.success,
            update: uploaded.update,
            skipped: report.matched,
            errors: uploaded.errors,
        })
    }
}
