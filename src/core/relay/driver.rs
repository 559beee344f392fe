//! Async event loop driving a single [`ProxySession`].

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, info};

use super::session::{ProxySession, SessionSettings, SessionSummary};
use super::transport::{CloseReason, FrameSink, TransportEvent};
use super::upstream::{UpstreamConnector, UpstreamLink};

/// Run one relay session to completion.
///
/// 1. Credential gate: without a key the client is closed and the connector
///    is never called.
/// 2. Opening: the upstream connect runs while client frames are drained and
///    dropped. A client that leaves during this phase aborts the connect.
/// 3. Open: frames are relayed in both directions until either leg closes
///    or errors, after which both legs are closed.
pub async fn run_session<C, E>(
    session_id: String,
    client: C,
    mut client_events: E,
    connector: Arc<dyn UpstreamConnector>,
    settings: Arc<SessionSettings>,
) -> SessionSummary
where
    C: FrameSink,
    E: Stream<Item = TransportEvent> + Unpin + Send,
{
    let mut session: ProxySession<C, Box<dyn FrameSink>> = ProxySession::new(session_id, client);

    let Ok(target) = session.begin(&settings) else {
        return session.summary().clone();
    };

    let link = {
        let connect = connector.connect(&target);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(link) => break Some(link),
                    Err(e) => {
                        session.on_upstream_error(&e.to_string());
                        break None;
                    }
                },
                event = client_events.next() => {
                    if !handle_client_event(&mut session, event) {
                        break None;
                    }
                }
            }
        }
    };

    let Some(UpstreamLink {
        sink,
        events: mut upstream_events,
    }) = link
    else {
        return finish(&session);
    };

    session.on_upstream_ready(sink, &settings.init_message());

    while !session.is_closed() {
        tokio::select! {
            event = client_events.next() => {
                handle_client_event(&mut session, event);
            }
            event = upstream_events.next() => match event {
                Some(TransportEvent::Frame(frame)) => {
                    session.on_upstream_frame(frame);
                }
                Some(TransportEvent::Closed(reason)) => session.on_upstream_closed(reason),
                Some(TransportEvent::Error(e)) => session.on_upstream_error(&e),
                None => session.on_upstream_closed(CloseReason::abnormal()),
            }
        }
    }

    finish(&session)
}

/// Apply one client event. Returns `false` once the session has closed.
fn handle_client_event<C, U>(
    session: &mut ProxySession<C, U>,
    event: Option<TransportEvent>,
) -> bool
where
    C: FrameSink,
    U: FrameSink,
{
    match event {
        Some(TransportEvent::Frame(frame)) => {
            session.on_client_frame(frame);
        }
        Some(TransportEvent::Closed(reason)) => session.on_client_closed(reason),
        Some(TransportEvent::Error(e)) => session.on_client_error(&e),
        None => session.on_client_closed(CloseReason::abnormal()),
    }
    !session.is_closed()
}

fn finish<C: FrameSink, U: FrameSink>(session: &ProxySession<C, U>) -> SessionSummary {
    let summary = session.summary().clone();
    info!(
        session_id = %session.id(),
        client_frames = summary.client_frames_forwarded,
        upstream_frames = summary.upstream_frames_forwarded,
        dropped_before_open = summary.frames_dropped_before_open,
        "Session ended"
    );
    if let Some(close) = &summary.close {
        debug!(session_id = %session.id(), close = %close, "Session close reason");
    }
    summary
}
