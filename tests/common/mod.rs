//! Shared helpers for integration tests: an in-process gateway and a fake
//! capture device.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use tokio::net::TcpListener;

use live_voice_gateway::core::audio::CaptureDevice;
use live_voice_gateway::{ServerConfig, routes, state::AppState};

/// Configuration pointing the relay at a local upstream.
pub fn test_config(upstream: Option<SocketAddr>, api_key: Option<&str>) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.google_api_key = api_key.map(str::to_string);
    if let Some(addr) = upstream {
        config.upstream_url = format!("ws://{addr}/ws");
    }
    config
}

/// Build the full router the binary serves.
pub fn gateway_router(config: ServerConfig) -> Router {
    let state = AppState::new(config);
    Router::new()
        .merge(routes::api::create_api_router())
        .merge(routes::live::create_live_router())
        .with_state(state)
}

/// Serve the gateway on an ephemeral port.
pub async fn spawn_gateway(config: ServerConfig) -> SocketAddr {
    let app = gateway_router(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Capture device with a fixed native rate that counts releases.
pub struct FakeMicrophone {
    pub rate: u32,
    pub released: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    pub fn new(rate: u32) -> (Box<dyn CaptureDevice>, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Self {
                rate,
                released: released.clone(),
            }),
            released,
        )
    }
}

impl CaptureDevice for FakeMicrophone {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
