pub mod health;
pub mod schemas;

use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", schemas::router(state.clone()))
        .route("/health", get(health::health))
        .route("/ws/watch", get(crate::ws::watch::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
