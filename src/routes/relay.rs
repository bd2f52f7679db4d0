//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET <path>` (default `/realtime`) - WebSocket upgrade. After admission
/// the socket is bridged to the upstream endpoint; text and binary frames
/// pass through unchanged and the relay adds `status` messages.
pub fn create_relay_router(path: &str) -> Router<Arc<AppState>> {
    Router::new()
        .route(path, get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
