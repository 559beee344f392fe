use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::StreamExt;
use tracing::{debug, info};

use crate::core::relay::transport::spawn_writer;
use crate::core::relay::{ChannelSink, CloseReason, RelayFrame, SinkCommand, TransportEvent};
use crate::state::AppState;

/// Maximum WebSocket frame size (10 MB)
pub const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
pub const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Relay WebSocket handler
///
/// Upgrades the connection and starts a relay session for it. The session
/// owns both legs until either side closes.
pub async fn live_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("Live WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_live_socket(socket, state))
}

async fn handle_live_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Live WebSocket connection established");

    let (sender, receiver) = socket.split();
    let (sink, commands) = ChannelSink::new();
    spawn_writer(sender, commands, to_axum_message, "client");

    let events = receiver
        .filter_map(|message| async move { from_axum_message(message) })
        .boxed();

    if let Err(e) = state.registry.accept(sink, events).await {
        debug!("Relay session task failed: {}", e);
    }
}

fn to_axum_message(command: SinkCommand) -> Message {
    match command {
        SinkCommand::Frame(RelayFrame::Text(text)) => Message::Text(text.into()),
        SinkCommand::Frame(RelayFrame::Binary(data)) => Message::Binary(data),
        SinkCommand::Close(reason) => Message::Close(reason.wire_code().map(|code| CloseFrame {
            code,
            reason: reason.wire_reason().to_string().into(),
        })),
    }
}

fn from_axum_message(message: Result<Message, axum::Error>) -> Option<TransportEvent> {
    match message {
        Ok(Message::Text(text)) => Some(TransportEvent::Frame(RelayFrame::Text(
            text.as_str().to_owned(),
        ))),
        Ok(Message::Binary(data)) => Some(TransportEvent::Frame(RelayFrame::Binary(data))),
        Ok(Message::Close(Some(frame))) => Some(TransportEvent::Closed(CloseReason::new(
            frame.code,
            frame.reason.as_str(),
        ))),
        Ok(Message::Close(None)) => Some(TransportEvent::Closed(CloseReason::no_status())),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(TransportEvent::Error(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_outbound_close_mirrors_code_and_reason() {
        match to_axum_message(SinkCommand::Close(CloseReason::new(4001, "bye"))) {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 4001);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(matches!(
            to_axum_message(SinkCommand::Close(CloseReason::no_status())),
            Message::Close(None)
        ));
    }

    #[test]
    fn test_inbound_frames_keep_their_kind() {
        assert_eq!(
            from_axum_message(Ok(Message::Binary(Bytes::from_static(&[7, 8])))),
            Some(TransportEvent::Frame(RelayFrame::Binary(Bytes::from_static(
                &[7, 8]
            ))))
        );
        assert_eq!(
            from_axum_message(Ok(Message::Text("{}".into()))),
            Some(TransportEvent::Frame(RelayFrame::Text("{}".into())))
        );
        assert_eq!(from_axum_message(Ok(Message::Ping(Bytes::new()))), None);
    }

    #[test]
    fn test_inbound_close() {
        assert_eq!(
            from_axum_message(Ok(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "done".into(),
            })))),
            Some(TransportEvent::Closed(CloseReason::new(1000, "done")))
        );
        assert_eq!(
            from_axum_message(Ok(Message::Close(None))),
            Some(TransportEvent::Closed(CloseReason::no_status()))
        );
    }
}
