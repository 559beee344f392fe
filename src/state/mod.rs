use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::relay::{RelaySessionRegistry, UpstreamConnector, WebSocketUpstreamConnector};

/// Application state that can be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    /// Spawns one relay session per `/live` connection
    pub registry: RelaySessionRegistry,
}

impl AppState {
    /// Build state that dials the real upstream endpoint.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_connector(config, Arc::new(WebSocketUpstreamConnector::new()))
    }

    /// Build state around a custom upstream connector.
    pub fn with_connector(config: ServerConfig, connector: Arc<dyn UpstreamConnector>) -> Arc<Self> {
        if !config.has_upstream_credential() {
            tracing::warn!(
                "GOOGLE_API_KEY is not set; every /live session will be closed with 1011"
            );
        }

        let registry = RelaySessionRegistry::new(config.session_settings(), connector);
        Arc::new(Self { config, registry })
    }
}
