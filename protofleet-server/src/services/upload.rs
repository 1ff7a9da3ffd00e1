//! Upload intake.
//!
//! The request body is newline-delimited JSON, one `UploadChunk` per line.
//! Each chunk is applied to the ledger as soon as its line is complete and
//! the stored artifacts are pushed to stale subscribers before the next
//! chunk is read.

use bytes::{Buf, BytesMut};
use protofleet_core::protocol::{UploadChunk, UploadReport};
use protofleet_core::Ledger;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::sync::{Published, SubscriptionRegistry};

pub struct UploadSession {
    ledger: Arc<Ledger>,
    registry: Arc<SubscriptionRegistry>,
    buffer: BytesMut,
    line: usize,
    report: UploadReport,
}

impl UploadSession {
    pub fn new(ledger: Arc<Ledger>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            ledger,
            registry,
            buffer: BytesMut::new(),
            line: 0,
            report: UploadReport::default(),
        }
    }

    /// Append body bytes and apply every line they complete.
    pub async fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            self.apply_line(&line).await;
        }
    }

    /// Apply a trailing unterminated line and close the session.
    pub async fn finish(mut self) -> UploadReport {
        if !self.buffer.is_empty() {
            let line = self.buffer.split();
            self.apply_line(&line).await;
        }
        debug!(
            success = self.report.success,
            update = self.report.update,
            errors = self.report.errors.len(),
            "Upload finished"
        );
        self.report
    }

    async fn apply_line(&mut self, line: &[u8]) {
        self.line += 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        match serde_json::from_slice::<UploadChunk>(line) {
            Ok(chunk) => self.apply_chunk(chunk).await,
            Err(e) => {
                warn!(line = self.line, "Malformed upload chunk: {}", e);
                self.report
                    .errors
                    .insert(format!("line {}", self.line), e.to_string());
            }
        }
    }

    async fn apply_chunk(&mut self, chunk: UploadChunk) {
        let mut published = Vec::new();

        for (path, file) in chunk.entries {
            let digest = file
                .digest
                .unwrap_or_else(|| protofleet_core::digest(&file.content));

            if self
                .ledger
                .digest_of(&path)
                .await
                .is_ok_and(|current| current == digest)
            {
                self.report.success += 1;
                continue;
            }

            match self.ledger.store(&path, file.content.clone()).await {
                Ok(digest) => {
                    self.report.success += 1;
                    self.report.update += 1;
                    published.push(Published {
                        path,
                        digest,
                        content: file.content,
                    });
                }
                Err(e) => {
                    warn!(path = %path, "Failed to store upload: {}", e);
                    self.report.errors.insert(path, e.to_string());
                }
            }
        }

        self.registry.distribute(&published).await;
    }
}
