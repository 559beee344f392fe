//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `live` - Relay WebSocket endpoint

pub mod api;
pub mod live;

pub use live::live_handler;
