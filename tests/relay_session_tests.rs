//! Registry-level relay tests with an in-memory upstream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc as events;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use live_voice_gateway::core::relay::{
    ChannelSink, CloseReason, RelayFrame, RelaySessionRegistry, SessionSettings, SinkCommand,
    TransportEvent, UpstreamConnector, UpstreamError, UpstreamLink, UpstreamTarget,
};

const STEP: Duration = Duration::from_secs(5);

/// One upstream leg handed out by the connector.
struct UpstreamHandle {
    target: String,
    commands: mpsc::UnboundedReceiver<SinkCommand>,
    events: events::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct InMemoryConnector {
    legs: Mutex<Vec<UpstreamHandle>>,
}

#[async_trait]
impl UpstreamConnector for InMemoryConnector {
    async fn connect(&self, target: &UpstreamTarget) -> Result<UpstreamLink, UpstreamError> {
        let (sink, commands) = ChannelSink::new();
        let (events_tx, events_rx) = events::unbounded();
        self.legs.lock().push(UpstreamHandle {
            target: target.as_str().to_string(),
            commands,
            events: events_tx,
        });
        Ok(UpstreamLink {
            sink: Box::new(sink),
            events: events_rx.boxed(),
        })
    }
}

async fn next_leg(connector: &InMemoryConnector) -> UpstreamHandle {
    timeout(STEP, async {
        loop {
            if let Some(leg) = connector.legs.lock().pop() {
                return leg;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("connector was never called")
}

async fn next_command(rx: &mut mpsc::UnboundedReceiver<SinkCommand>) -> SinkCommand {
    timeout(STEP, rx.recv()).await.unwrap().unwrap()
}

fn registry(connector: Arc<InMemoryConnector>) -> RelaySessionRegistry {
    let settings = SessionSettings::default()
        .with_credential("registry-key")
        .with_upstream_url("ws://upstream.test/ws");
    RelaySessionRegistry::new(settings, connector)
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let connector = Arc::new(InMemoryConnector::default());
    let registry = registry(connector.clone());

    let (client_a, mut client_a_rx) = ChannelSink::new();
    let (client_a_tx, client_a_events) = events::unbounded();
    let session_a = registry.accept(client_a, client_a_events);
    let mut leg_a = next_leg(&connector).await;

    let (client_b, mut client_b_rx) = ChannelSink::new();
    let (client_b_tx, client_b_events) = events::unbounded();
    let session_b = registry.accept(client_b, client_b_events);
    let mut leg_b = next_leg(&connector).await;

    for leg in [&leg_a, &leg_b] {
        assert!(leg.target.starts_with("ws://upstream.test/ws?"));
        assert!(leg.target.contains("key=registry-key"));
    }

    // Each upstream gets exactly one session.update before anything else
    for leg in [&mut leg_a, &mut leg_b] {
        match next_command(&mut leg.commands).await {
            SinkCommand::Frame(RelayFrame::Text(text)) => assert!(text.contains("session.update")),
            other => panic!("expected session.update, got {other:?}"),
        }
    }

    client_a_tx
        .unbounded_send(TransportEvent::Frame(RelayFrame::Binary(Bytes::from_static(b"aa"))))
        .unwrap();
    client_b_tx
        .unbounded_send(TransportEvent::Frame(RelayFrame::Binary(Bytes::from_static(b"bb"))))
        .unwrap();

    assert_eq!(
        next_command(&mut leg_a.commands).await,
        SinkCommand::Frame(RelayFrame::Binary(Bytes::from_static(b"aa")))
    );
    assert_eq!(
        next_command(&mut leg_b.commands).await,
        SinkCommand::Frame(RelayFrame::Binary(Bytes::from_static(b"bb")))
    );

    // Closing A's upstream leaves B running
    leg_a
        .events
        .unbounded_send(TransportEvent::Error("reset".into()))
        .unwrap();
    let summary_a = timeout(STEP, session_a).await.unwrap().unwrap();
    assert_eq!(summary_a.close, Some(CloseReason::upstream_error()));
    assert_eq!(
        next_command(&mut client_a_rx).await,
        SinkCommand::Close(CloseReason::upstream_error())
    );

    leg_b
        .events
        .unbounded_send(TransportEvent::Frame(RelayFrame::Text("{\"type\":\"b\"}".into())))
        .unwrap();
    assert_eq!(
        next_command(&mut client_b_rx).await,
        SinkCommand::Frame(RelayFrame::Text("{\"type\":\"b\"}".into()))
    );

    // Client B leaving closes its upstream with the client's code
    client_b_tx
        .unbounded_send(TransportEvent::Closed(CloseReason::new(4000, "bye")))
        .unwrap();
    let summary_b = timeout(STEP, session_b).await.unwrap().unwrap();
    assert_eq!(summary_b.client_frames_forwarded, 1);
    assert_eq!(summary_b.upstream_frames_forwarded, 1);
    assert_eq!(
        next_command(&mut leg_b.commands).await,
        SinkCommand::Close(CloseReason::new(4000, "bye"))
    );
}

#[tokio::test]
async fn test_client_error_closes_upstream_with_client_error() {
    let connector = Arc::new(InMemoryConnector::default());
    let registry = registry(connector.clone());

    let (client, _client_rx) = ChannelSink::new();
    let (client_tx, client_events) = events::unbounded();
    let session = registry.accept(client, client_events);
    let mut leg = next_leg(&connector).await;
    let _init = next_command(&mut leg.commands).await;

    client_tx
        .unbounded_send(TransportEvent::Error("protocol violation".into()))
        .unwrap();
    let summary = timeout(STEP, session).await.unwrap().unwrap();

    assert_eq!(summary.close, Some(CloseReason::client_error()));
    assert_eq!(
        next_command(&mut leg.commands).await,
        SinkCommand::Close(CloseReason::client_error())
    );
}
