//! Client pull multiplexer.
//!
//! All pulls of one agent share a single watch stream. Pulls take turns: a
//! pull sends its control and waits until the server has delivered the
//! final batch of its pass before the next pull may send. Push batches that
//! arrive on the same stream are applied to the local ledger but never
//! complete a pull.

pub mod settle;

use protofleet_core::protocol::{Batch, Control};
use protofleet_core::{Ledger, Manifest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::utils::errors::{AgentError, Result};
use crate::ws::{WatchConnector, WatchStream};
use settle::{Settled, Settler};

const EVENT_CAPACITY: usize = 256;

/// An artifact written to the local ledger from a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub path: String,
    pub digest: String,
    pub is_pull: bool,
}

type Slot = Arc<Mutex<Option<Arc<Cycle>>>>;

pub struct PullMultiplexer {
    connector: Arc<dyn WatchConnector>,
    ledger: Arc<Ledger>,
    strict: bool,
    /// FIFO gate: one pull in flight at a time
    turn: tokio::sync::Mutex<()>,
    active: Slot,
    next_cycle: AtomicU64,
    events: broadcast::Sender<Applied>,
}

/// One live watch stream and the pull currently waiting on it.
struct Cycle {
    id: u64,
    outbound: mpsc::UnboundedSender<Control>,
    shutdown: CancellationToken,
    state: Mutex<CycleState>,
}

#[derive(Default)]
struct CycleState {
    closed: bool,
    /// Controls sent on this stream
    sent: u64,
    /// Pull passes the server has finished
    completed: u64,
    /// Waiting pull and the pass number it waits for
    pending: Option<(u64, Settler<()>)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Cycle {
    /// Register a new pull pass. `None` when the stream already ended.
    fn arm(&self) -> Option<Settled<()>> {
        let mut state = lock(&self.state);
        if state.closed {
            return None;
        }
        state.sent += 1;
        let (settler, settled) = settle::channel();
        state.pending = Some((state.sent, settler));
        Some(settled)
    }

    fn complete_pass(&self) {
        let mut state = lock(&self.state);
        state.completed += 1;
        let completed = state.completed;
        if let Some((pass, _)) = &state.pending {
            if *pass == completed {
                if let Some((_, settler)) = state.pending.take() {
                    settler.resolve(());
                }
            }
        }
    }

    /// Reject the waiting pull whatever pass it waits for.
    fn reject_pending(&self, error: AgentError) {
        if let Some((_, settler)) = &lock(&self.state).pending {
            settler.reject(error);
        }
    }

    /// Reject the waiting pull only if the pass being delivered is its own.
    fn reject_current(&self, error: AgentError) {
        let state = lock(&self.state);
        if let Some((pass, settler)) = &state.pending {
            if *pass == state.completed + 1 {
                settler.reject(error);
            }
        }
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn close(&self, error: AgentError) {
        let pending = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.pending.take()
        };
        if let Some((_, settler)) = pending {
            settler.reject(error);
        }
        self.shutdown.cancel();
    }
}

impl PullMultiplexer {
    pub fn new(connector: Arc<dyn WatchConnector>, ledger: Arc<Ledger>, strict: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector,
            ledger,
            strict,
            turn: tokio::sync::Mutex::new(()),
            active: Arc::new(Mutex::new(None)),
            next_cycle: AtomicU64::new(1),
            events,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Artifacts applied from any batch, pull or push.
    pub fn subscribe(&self) -> broadcast::Receiver<Applied> {
        self.events.subscribe()
    }

    /// Submit `manifest` and wait until the server has delivered every entry.
    ///
    /// Fails with `StreamClosed` (or the transport error) when the stream
    /// ends first, and in strict mode with the first entry error of the pass.
    pub async fn pull(&self, manifest: &Manifest, batch_size: u32) -> Result<()> {
        let _turn = self.turn.lock().await;

        let (cycle, settled) = match self.live_cycle().and_then(|c| c.arm().map(|s| (c, s))) {
            Some(armed) => armed,
            None => {
                let cycle = self.open_cycle().await?;
                let settled = cycle.arm().ok_or(AgentError::StreamClosed)?;
                (cycle, settled)
            }
        };

        debug!(
            cycle = cycle.id,
            entries = manifest.len(),
            batch_size,
            "Sending pull"
        );
        let control = Control {
            manifest: manifest.render(),
            batch_size,
        };
        if cycle.outbound.send(control).is_err() {
            cycle.reject_pending(AgentError::StreamClosed);
        }

        settled.await
    }

    pub fn is_active(&self) -> bool {
        self.live_cycle().is_some()
    }

    /// Shut down the active stream. A waiting pull fails with `StreamClosed`.
    pub fn close(&self) {
        let cycle = lock(&self.active).take();
        if let Some(cycle) = cycle {
            info!(cycle = cycle.id, "Closing watch stream");
            cycle.close(AgentError::StreamClosed);
        }
    }

    /// Resolves when the active stream ends (immediately if there is none).
    pub async fn closed(&self) {
        let token = self.live_cycle().map(|c| c.shutdown.clone());
        if let Some(token) = token {
            token.cancelled().await;
        }
    }

    fn live_cycle(&self) -> Option<Arc<Cycle>> {
        lock(&self.active).clone().filter(|c| !c.is_closed())
    }

    async fn open_cycle(&self) -> Result<Arc<Cycle>> {
        let WatchStream {
            outbound,
            inbound,
            shutdown,
        } = self.connector.open().await?;

        let cycle = Arc::new(Cycle {
            id: self.next_cycle.fetch_add(1, Ordering::SeqCst),
            outbound,
            shutdown,
            state: Mutex::new(CycleState::default()),
        });
        *lock(&self.active) = Some(cycle.clone());
        debug!(cycle = cycle.id, "Watch stream opened");

        let dispatcher = Dispatcher {
            cycle: cycle.clone(),
            ledger: self.ledger.clone(),
            strict: self.strict,
            active: self.active.clone(),
            events: self.events.clone(),
        };
        tokio::spawn(dispatcher.run(inbound));

        Ok(cycle)
    }
}

impl Drop for PullMultiplexer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Applies inbound batches of one stream.
struct Dispatcher {
    cycle: Arc<Cycle>,
    ledger: Arc<Ledger>,
    strict: bool,
    active: Slot,
    events: broadcast::Sender<Applied>,
}

impl Dispatcher {
    async fn run(self, mut inbound: mpsc::UnboundedReceiver<Result<Batch>>) {
        let end = loop {
            // Batches queued before shutdown still belong to the stream
            tokio::select! {
                biased;
                item = inbound.recv() => match item {
                    Some(Ok(batch)) => self.apply(batch).await,
                    Some(Err(e)) => break e,
                    None => break AgentError::StreamClosed,
                },
                _ = self.cycle.shutdown.cancelled() => break AgentError::StreamClosed,
            }
        };

        match &end {
            AgentError::StreamClosed => info!(cycle = self.cycle.id, "Watch stream ended"),
            e => warn!(cycle = self.cycle.id, "Watch stream failed: {}", e),
        }
        self.cycle.close(end);

        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|c| c.id == self.cycle.id) {
            *active = None;
        }
    }

    async fn apply(&self, batch: Batch) {
        debug!(
            cycle = self.cycle.id,
            entries = batch.entries.len(),
            has_more = batch.has_more,
            is_pull = batch.is_pull,
            "Applying batch"
        );

        for (path, entry) in batch.entries {
            if let Some(message) = entry.error {
                self.entry_failed(path, message, batch.is_pull);
                continue;
            }
            let Some(file) = entry.file else {
                debug!(path = %path, "Up to date");
                continue;
            };

            match self.ledger.store(&path, file.content).await {
                Ok(digest) => {
                    if digest != file.digest {
                        warn!(
                            path = %path,
                            expected = %file.digest,
                            actual = %digest,
                            "Digest mismatch"
                        );
                    }
                    let _ = self.events.send(Applied {
                        path,
                        digest,
                        is_pull: batch.is_pull,
                    });
                }
                Err(e) => self.entry_failed(path, e.to_string(), batch.is_pull),
            }
        }

        if batch.is_pull && !batch.has_more {
            self.cycle.complete_pass();
        }
    }

    fn entry_failed(&self, path: String, message: String, is_pull: bool) {
        error!(path = %path, "{}", message);
        if self.strict && is_pull {
            self.cycle.reject_current(AgentError::Entry { path, message });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::memory::{MemoryConnector, MemoryPeer};
    use bytes::Bytes;
    use protofleet_core::protocol::BatchEntry;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        connector: Arc<MemoryConnector>,
        peers: mpsc::UnboundedReceiver<MemoryPeer>,
        mux: Arc<PullMultiplexer>,
    }

    impl Harness {
        fn new(strict: bool) -> Self {
            let dir = TempDir::new().unwrap();
            let ledger = Arc::new(Ledger::new(dir.path()));
            let (connector, peers) = MemoryConnector::new();
            let connector = Arc::new(connector);
            let mux = Arc::new(PullMultiplexer::new(connector.clone(), ledger, strict));
            Self {
                _dir: dir,
                connector,
                peers,
                mux,
            }
        }

        fn spawn_pull(&self, manifest: &str) -> tokio::task::JoinHandle<Result<()>> {
            let mux = self.mux.clone();
            let manifest = Manifest::parse(manifest);
            tokio::spawn(async move { mux.pull(&manifest, 1).await })
        }

        async fn peer(&mut self) -> MemoryPeer {
            self.peers.recv().await.unwrap()
        }
    }

    fn file_entry(body: &'static str) -> BatchEntry {
        BatchEntry::file(Bytes::from_static(body.as_bytes()), protofleet_core::digest(body.as_bytes()))
    }

    fn batch(entries: Vec<(&str, BatchEntry)>, has_more: bool, is_pull: bool) -> Batch {
        Batch {
            entries: entries
                .into_iter()
                .map(|(p, e)| (p.to_string(), e))
                .collect(),
            has_more,
            is_pull,
        }
    }

    #[tokio::test]
    async fn test_pull_resolves_on_final_batch() {
        let mut h = Harness::new(false);
        let pull = h.spawn_pull("a.proto\nb.proto");
        let mut peer = h.peer().await;

        let control = peer.next_control().await.unwrap();
        assert_eq!(control.manifest, "a.proto\nb.proto");
        assert_eq!(control.batch_size, 1);

        peer.send(batch(vec![("a.proto", file_entry("A"))], true, true));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pull.is_finished());

        peer.send(batch(vec![("b.proto", file_entry("B"))], false, true));
        pull.await.unwrap().unwrap();

        let ledger = h.mux.ledger();
        assert_eq!(ledger.get("a.proto").await.unwrap().content, "A");
        assert_eq!(ledger.get("b.proto").await.unwrap().content, "B");
        assert!(h.mux.is_active());
    }

    #[tokio::test]
    async fn test_concurrent_pulls_share_one_stream() {
        let mut h = Harness::new(false);
        let first = h.spawn_pull("a.proto");
        let mut peer = h.peer().await;
        let second = h.spawn_pull("b.proto");

        assert_eq!(peer.next_control().await.unwrap().manifest, "a.proto");
        peer.send(batch(vec![("a.proto", file_entry("A"))], false, true));
        first.await.unwrap().unwrap();

        assert_eq!(peer.next_control().await.unwrap().manifest, "b.proto");
        peer.send(batch(vec![("b.proto", file_entry("B"))], false, true));
        second.await.unwrap().unwrap();

        assert_eq!(h.connector.opened(), 1);
    }

    #[tokio::test]
    async fn test_push_batches_do_not_settle_pull() {
        let mut h = Harness::new(false);
        let mut events = h.mux.subscribe();
        let pull = h.spawn_pull("a.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();

        peer.send(batch(vec![("x.proto", file_entry("X"))], false, false));
        let applied = events.recv().await.unwrap();
        assert_eq!(applied.path, "x.proto");
        assert!(!applied.is_pull);
        assert!(!pull.is_finished());

        peer.send(batch(vec![("a.proto", BatchEntry::up_to_date())], false, true));
        pull.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_lenient_mode_logs_entry_errors() {
        let mut h = Harness::new(false);
        let pull = h.spawn_pull("missing.proto\na.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();

        peer.send(batch(
            vec![
                ("missing.proto", BatchEntry::error("file missing.proto not exists.")),
                ("a.proto", file_entry("A")),
            ],
            false,
            true,
        ));
        pull.await.unwrap().unwrap();
        assert!(h.mux.ledger().exists("a.proto").await);
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_on_entry_error() {
        let mut h = Harness::new(true);
        let pull = h.spawn_pull("missing.proto\na.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();

        peer.send(batch(
            vec![
                ("a.proto", file_entry("A")),
                ("missing.proto", BatchEntry::error("file missing.proto not exists.")),
            ],
            false,
            true,
        ));
        let err = pull.await.unwrap().unwrap_err();
        assert!(matches!(err, AgentError::Entry { ref path, .. } if path == "missing.proto"));
        // Remaining entries of the batch are still applied
        assert!(h.mux.ledger().exists("a.proto").await);
    }

    #[tokio::test]
    async fn test_strict_rejection_does_not_leak_into_next_pull() {
        let mut h = Harness::new(true);
        let first = h.spawn_pull("m.proto\na.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();

        peer.send(batch(vec![("m.proto", BatchEntry::error("gone"))], true, true));
        assert!(first.await.unwrap().is_err());

        let second = h.spawn_pull("b.proto");
        peer.next_control().await.unwrap();

        // Final batch of the first pass must not complete the second pull
        peer.send(batch(vec![("a.proto", file_entry("A"))], false, true));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        peer.send(batch(vec![("b.proto", file_entry("B"))], false, true));
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_push_errors_never_reject_in_strict_mode() {
        let mut h = Harness::new(true);
        let pull = h.spawn_pull("a.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();

        peer.send(batch(vec![("x.proto", BatchEntry::error("bad"))], false, false));
        peer.send(batch(vec![("a.proto", file_entry("A"))], false, true));
        pull.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stream_end_rejects_and_next_pull_reopens() {
        let mut h = Harness::new(false);
        let first = h.spawn_pull("a.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();

        drop(peer);
        assert!(matches!(
            first.await.unwrap(),
            Err(AgentError::StreamClosed)
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!h.mux.is_active());

        let second = h.spawn_pull("a.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();
        peer.send(batch(vec![("a.proto", file_entry("A"))], false, true));
        second.await.unwrap().unwrap();

        assert_eq!(h.connector.opened(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_surfaced() {
        let mut h = Harness::new(false);
        let pull = h.spawn_pull("a.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();

        peer.fail(AgentError::Network("connection reset".into()));
        assert!(matches!(pull.await.unwrap(), Err(AgentError::Network(_))));
    }

    #[tokio::test]
    async fn test_final_batch_before_shutdown_is_applied() {
        for _ in 0..50 {
            let mut h = Harness::new(false);
            let pull = h.spawn_pull("a.proto");
            let mut peer = h.peer().await;
            peer.next_control().await.unwrap();

            peer.send(batch(vec![("a.proto", file_entry("A"))], false, true));
            peer.shutdown.cancel();

            pull.await.unwrap().unwrap();
            assert_eq!(h.mux.ledger().get("a.proto").await.unwrap().content, "A");
        }
    }

    #[tokio::test]
    async fn test_transport_error_before_shutdown_is_kept() {
        let mut h = Harness::new(false);
        let pull = h.spawn_pull("a.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();

        peer.fail(AgentError::Network("connection reset".into()));
        peer.shutdown.cancel();
        assert!(matches!(pull.await.unwrap(), Err(AgentError::Network(_))));
    }

    #[tokio::test]
    async fn test_close_fails_waiting_pull() {
        let mut h = Harness::new(false);
        let pull = h.spawn_pull("a.proto");
        let mut peer = h.peer().await;
        peer.next_control().await.unwrap();

        h.mux.close();
        assert!(matches!(pull.await.unwrap(), Err(AgentError::StreamClosed)));
        assert!(peer.shutdown.is_cancelled());
        assert!(!h.mux.is_active());
    }
}
