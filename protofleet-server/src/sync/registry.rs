use bytes::Bytes;
use dashmap::DashMap;
use protofleet_core::protocol::{Control, ServerMessage};
use protofleet_core::Manifest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::catalog::Catalog;
use super::diff::{DiffEngine, Outcome};
use super::fleet::Fleet;
use super::SyncError;

/// A live watch connection.
#[derive(Debug)]
pub struct Subscriber {
    pub id: Uuid,
    pub manifest: Manifest,
    pub capacity: usize,
    pub outbox: mpsc::UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
}

/// An artifact that was just written to the ledger.
#[derive(Debug, Clone)]
pub struct Published {
    pub path: String,
    pub digest: String,
    pub content: Bytes,
}

/// A push pass prepared while iterating the registry.
struct Delivery {
    id: Uuid,
    outbox: mpsc::UnboundedSender<ServerMessage>,
    capacity: usize,
    cancel: CancellationToken,
    artifacts: Vec<Published>,
}

pub struct SubscriptionRegistry {
    subscribers: DashMap<Uuid, Subscriber>,
    engine: DiffEngine,
    idle_window: Duration,
}

impl SubscriptionRegistry {
    pub fn new(catalog: Arc<dyn Catalog>, idle_window: Duration) -> Self {
        Self {
            subscribers: DashMap::new(),
            engine: DiffEngine::new(catalog),
            idle_window,
        }
    }

    pub fn register(&self, outbox: mpsc::UnboundedSender<ServerMessage>) -> Uuid {
        let id = Uuid::new_v4();
        self.subscribers.insert(
            id,
            Subscriber {
                id,
                manifest: Manifest::default(),
                capacity: 1,
                outbox,
                cancel: CancellationToken::new(),
            },
        );
        debug!(subscriber = %id, "Subscriber registered");
        id
    }

    /// Retire a subscriber: its timers stop and unshipped entries are dropped.
    pub fn unregister(&self, id: &Uuid) -> bool {
        match self.subscribers.remove(id) {
            Some((_, subscriber)) => {
                subscriber.cancel.cancel();
                debug!(subscriber = %id, "Subscriber retired");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.subscribers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Remembered manifest of a subscriber.
    pub fn manifest_of(&self, id: &Uuid) -> Option<Manifest> {
        self.subscribers.get(id).map(|s| s.manifest.clone())
    }

    /// Handle a control message: replace the manifest, update the batch size
    /// and run a pull pass. Blank manifest text keeps the previous manifest.
    pub async fn submit(&self, id: &Uuid, control: Control) -> Result<(), SyncError> {
        let (manifest, fleet) = {
            let mut subscriber = self
                .subscribers
                .get_mut(id)
                .ok_or(SyncError::UnknownSubscriber(*id))?;

            if !control.manifest.trim().is_empty() {
                subscriber.manifest = Manifest::parse(&control.manifest);
            }
            if control.batch_size > 0 {
                subscriber.capacity = control.batch_size as usize;
            }

            let fleet = Fleet::new(
                subscriber.outbox.clone(),
                subscriber.capacity,
                self.idle_window,
                true,
                subscriber.cancel.child_token(),
            );
            (subscriber.manifest.clone(), fleet)
        };

        debug!(
            subscriber = %id,
            entries = manifest.len(),
            capacity = fleet.capacity(),
            "Starting pull pass"
        );
        self.engine.resolve_into(&manifest, &fleet).await;
        fleet.finish().await;
        Ok(())
    }

    /// Push freshly stored artifacts to every subscriber whose manifest
    /// declares them with a different tag. Returns the number of subscribers
    /// that received a push.
    pub async fn distribute(&self, published: &[Published]) -> usize {
        if published.is_empty() {
            return 0;
        }

        let mut deliveries = Vec::new();
        for mut subscriber in self.subscribers.iter_mut() {
            let due: Vec<Published> = published
                .iter()
                .filter(|p| {
                    subscriber
                        .manifest
                        .tag_of(&p.path)
                        .is_some_and(|tag| tag != p.digest)
                })
                .cloned()
                .collect();
            if due.is_empty() {
                continue;
            }

            for artifact in &due {
                subscriber.manifest.set_tag(&artifact.path, &artifact.digest);
            }
            deliveries.push(Delivery {
                id: subscriber.id,
                outbox: subscriber.outbox.clone(),
                capacity: subscriber.capacity,
                cancel: subscriber.cancel.child_token(),
                artifacts: due,
            });
        }

        let pushed = deliveries.len();
        for delivery in deliveries {
            let fleet = Fleet::new(
                delivery.outbox,
                delivery.capacity,
                self.idle_window,
                false,
                delivery.cancel,
            );
            let last = delivery.artifacts.len() - 1;
            for (i, artifact) in delivery.artifacts.into_iter().enumerate() {
                let outcome = Outcome::Fetched {
                    content: artifact.content,
                    digest: artifact.digest,
                };
                fleet.load(&artifact.path, outcome, i == last).await;
            }
            fleet.finish().await;
            debug!(subscriber = %delivery.id, "Pushed update");
        }

        if pushed > 0 {
            info!(
                "Pushed {} artifact(s) to {} subscriber(s)",
                published.len(),
                pushed
            );
        }
        pushed
    }
}
