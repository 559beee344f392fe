use std::sync::Arc;

use futures::Stream;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use super::driver::run_session;
use super::session::{SessionSettings, SessionSummary};
use super::transport::{FrameSink, TransportEvent};
use super::upstream::UpstreamConnector;

/// Accepts client connections and runs one independent relay session per
/// connection.
///
/// Holds no per-session state: only the shared settings and connector.
#[derive(Clone)]
pub struct RelaySessionRegistry {
    settings: Arc<SessionSettings>,
    connector: Arc<dyn UpstreamConnector>,
}

impl RelaySessionRegistry {
    pub fn new(settings: SessionSettings, connector: Arc<dyn UpstreamConnector>) -> Self {
        Self {
            settings: Arc::new(settings),
            connector,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Spawn a session for a newly accepted client connection.
    pub fn accept<C, E>(&self, client: C, client_events: E) -> JoinHandle<SessionSummary>
    where
        C: FrameSink + 'static,
        E: Stream<Item = TransportEvent> + Unpin + Send + 'static,
    {
        let session_id = Uuid::new_v4().to_string();
        info!(session_id = %session_id, "Client connected");

        tokio::spawn(run_session(
            session_id,
            client,
            client_events,
            self.connector.clone(),
            self.settings.clone(),
        ))
    }
}

impl std::fmt::Debug for RelaySessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySessionRegistry")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
