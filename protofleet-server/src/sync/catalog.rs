use async_trait::async_trait;
use bytes::Bytes;
use protofleet_core::{Ledger, LedgerError};

/// What the resolver needs to know about the canonical artifact set.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn exists(&self, path: &str) -> bool;

    /// True when `tag` names the current version of `path`.
    async fn is_current(&self, path: &str, tag: &str) -> bool;

    /// Current bytes and digest of `path`.
    async fn fetch(&self, path: &str) -> Result<(Bytes, String), LedgerError>;
}

#[async_trait]
impl Catalog for Ledger {
    async fn exists(&self, path: &str) -> bool {
        Ledger::exists(self, path).await
    }

    async fn is_current(&self, path: &str, tag: &str) -> bool {
        !tag.is_empty()
            && self
                .digest_of(path)
                .await
                .is_ok_and(|digest| digest == tag)
    }

    async fn fetch(&self, path: &str) -> Result<(Bytes, String), LedgerError> {
        let entry = self.get(path).await?;
        Ok((entry.content, entry.digest))
    }
}
