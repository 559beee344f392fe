//! Relay WebSocket endpoint.
//!
//! Adapts an axum WebSocket into the transport seam the relay core speaks
//! and hands it to the session registry.

mod handler;

pub use handler::{MAX_WS_FRAME_SIZE, MAX_WS_MESSAGE_SIZE, live_handler};
