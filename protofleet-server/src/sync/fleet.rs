//! Per-pass batch accumulator.
//!
//! A fleet buffers resolved outcomes for one subscriber and ships them as a
//! single `Batch` when:
//! - the buffer reaches `capacity`
//! - the pass loads its last entry (the final batch, `has_more = false`)
//! - `idle_window` elapses after the most recent load
//!
//! The idle timer is a sliding window: every load cancels and replaces the
//! previous timer. With `capacity == 1` every load ships immediately and no
//! timer is armed.

use indexmap::IndexMap;
use protofleet_core::protocol::{Batch, BatchEntry, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::diff::Outcome;

pub struct Fleet {
    dock: Arc<Dock>,
    capacity: usize,
    idle_window: Duration,
}

/// State shared between the fleet and its idle timer.
struct Dock {
    outbox: mpsc::UnboundedSender<ServerMessage>,
    is_pull: bool,
    cancel: CancellationToken,
    hold: Mutex<Hold>,
}

#[derive(Default)]
struct Hold {
    /// Insertion order is manifest order
    entries: IndexMap<String, BatchEntry>,
    /// Bumped whenever the armed timer is cancelled or replaced
    generation: u64,
    timer: Option<JoinHandle<()>>,
    /// Final batch of the pass already shipped
    finished: bool,
}

impl Hold {
    fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Dock {
    fn ship(&self, hold: &mut Hold, has_more: bool) {
        hold.disarm();

        if hold.entries.is_empty() && (has_more || hold.finished) {
            return;
        }

        if self.cancel.is_cancelled() {
            hold.entries.clear();
            return;
        }

        let batch = Batch {
            entries: std::mem::take(&mut hold.entries),
            has_more,
            is_pull: self.is_pull,
        };
        if !has_more {
            hold.finished = true;
        }

        debug!(
            entries = batch.entries.len(),
            has_more,
            is_pull = self.is_pull,
            "Shipping batch"
        );
        if self.outbox.send(ServerMessage::Batch(batch)).is_err() {
            debug!("Subscriber outbox closed, dropping batch");
        }
    }
}

impl Fleet {
    /// `cancel` should be a child of the subscriber's token so that tearing
    /// the subscriber down stops timers and discards unshipped entries.
    pub fn new(
        outbox: mpsc::UnboundedSender<ServerMessage>,
        capacity: usize,
        idle_window: Duration,
        is_pull: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dock: Arc::new(Dock {
                outbox,
                is_pull,
                cancel,
                hold: Mutex::new(Hold::default()),
            }),
            capacity: capacity.max(1),
            idle_window,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn load(&self, path: &str, outcome: Outcome, is_last: bool) {
        if self.dock.cancel.is_cancelled() {
            return;
        }

        let mut hold = self.dock.hold.lock().await;
        hold.entries.insert(path.to_string(), outcome.into());

        if hold.entries.len() >= self.capacity || is_last {
            self.dock.ship(&mut hold, !is_last);
        } else {
            self.arm(&mut hold);
        }
    }

    /// Forced final flush of the pass. Ships whatever is pending with
    /// `has_more = false`; ships an empty final batch if the pass has not
    /// produced one yet, so the subscriber can tell the pass is complete.
    pub async fn finish(&self) {
        let mut hold = self.dock.hold.lock().await;
        self.dock.ship(&mut hold, false);
    }

    fn arm(&self, hold: &mut Hold) {
        hold.disarm();

        let generation = hold.generation;
        let dock = Arc::clone(&self.dock);
        let window = self.idle_window;

        hold.timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = dock.cancel.cancelled() => return,
                _ = tokio::time::sleep(window) => {}
            }

            let mut hold = dock.hold.lock().await;
            if hold.generation != generation {
                return;
            }
            hold.timer = None;
            dock.ship(&mut hold, true);
        }));
    }
}

impl Drop for Fleet {
    fn drop(&mut self) {
        self.dock.cancel.cancel();
    }
}
