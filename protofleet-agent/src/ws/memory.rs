//! In-process watch streams.
//!
//! Every `open` hands the far end of the new stream to whoever holds the
//! peer receiver, which then plays the server. Built for unit tests, and for
//! downstream crates through the `memory` feature.

use async_trait::async_trait;
use protofleet_core::protocol::{Batch, Control};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{WatchConnector, WatchStream};
use crate::utils::errors::{AgentError, Result};

pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    opened: AtomicUsize,
}

/// Server side of one in-process stream.
pub struct MemoryPeer {
    pub controls: mpsc::UnboundedReceiver<Control>,
    pub batches: mpsc::UnboundedSender<Result<Batch>>,
    pub shutdown: CancellationToken,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                opened: AtomicUsize::new(0),
            },
            rx,
        )
    }

    /// Number of streams opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WatchConnector for MemoryConnector {
    async fn open(&self) -> Result<WatchStream> {
        let (outbound, controls) = mpsc::unbounded_channel();
        let (batches, inbound) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        self.peers
            .send(MemoryPeer {
                controls,
                batches,
                shutdown: shutdown.clone(),
            })
            .map_err(|_| AgentError::Network("memory peer gone".into()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(WatchStream {
            outbound,
            inbound,
            shutdown,
        })
    }
}

impl MemoryPeer {
    pub async fn next_control(&mut self) -> Option<Control> {
        self.controls.recv().await
    }

    pub fn send(&self, batch: Batch) -> bool {
        self.batches.send(Ok(batch)).is_ok()
    }

    /// End the stream with a transport error.
    pub fn fail(&self, error: AgentError) {
        let _ = self.batches.send(Err(error));
    }
}
