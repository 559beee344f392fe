//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::live::live_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /live` - WebSocket upgrade; each connection gets its own upstream
/// session.
///
/// # Protocol
///
/// - Binary frames: PCM16 little-endian mono audio (16 kHz towards the
///   server, 24 kHz back)
/// - Text frames: JSON control messages, relayed verbatim
///
/// Frames sent before the upstream is ready are dropped. Without an upstream
/// credential the socket is closed with 1011.
pub fn create_live_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/live", get(live_handler))
        .layer(TraceLayer::new_for_http())
}
