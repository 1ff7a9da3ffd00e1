use crate::config::AppConfig;
use crate::sync::SubscriptionRegistry;
use chrono::{DateTime, Utc};
use protofleet_core::Ledger;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub ledger: Arc<Ledger>,
    pub registry: Arc<SubscriptionRegistry>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// The ledger should already be bootstrapped.
    pub fn new(ledger: Arc<Ledger>, config: AppConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(
            ledger.clone(),
            config.idle_window,
        ));
        Self {
            config,
            ledger,
            registry,
            started_at: Utc::now(),
        }
    }
}
