//! Schema distribution server.
//!
//! Holds the canonical ledger, serves the unary HTTP endpoints and keeps
//! every watching agent's manifest satisfied through batched pulls and
//! push-on-upload.

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod sync;
pub mod ws;

use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::state::AppState;

/// Serve the router on `listener` until `shutdown` completes.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = routes::create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
