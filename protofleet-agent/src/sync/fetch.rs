use protofleet_core::{Entry, Ledger};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::remote::SchemaClient;
use crate::utils::errors::Result;

/// Serves artifacts from the local ledger, refreshing them from the server.
pub struct Fetcher {
    ledger: Arc<Ledger>,
    client: SchemaClient,
}

impl Fetcher {
    pub fn new(ledger: Arc<Ledger>, client: SchemaClient) -> Self {
        Self { ledger, client }
    }

    /// Current version of `path`. The local copy is sent as the known digest
    /// so an unchanged artifact is not transferred again.
    pub async fn fetch(&self, path: &str, force: bool) -> Result<Entry> {
        let local = self.ledger.digest_of(path).await.ok();

        match self.client.fetch(path, local.as_deref(), force).await? {
            None => {
                debug!(path = %path, "Local copy is current");
                Ok(self.ledger.get(path).await?)
            }
            Some(file) => {
                let digest = self.ledger.store(path, file.content.clone()).await?;
                if digest != file.digest {
                    warn!(path = %path, expected = %file.digest, actual = %digest, "Digest mismatch");
                }
                info!(path = %path, digest = %digest, "Fetched");
                Ok(Entry {
                    path: path.to_string(),
                    digest,
                    content: file.content,
                })
            }
        }
    }
}
