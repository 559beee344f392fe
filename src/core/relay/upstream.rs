//! Upstream realtime endpoint connection.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info};

use super::session::UpstreamTarget;
use super::transport::{
    ChannelSink, CloseReason, FrameSink, RelayFrame, SinkCommand, TransportEvent, spawn_writer,
};

/// Errors raised while establishing the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("Upstream connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),
}

/// An established upstream leg.
pub struct UpstreamLink {
    pub sink: Box<dyn FrameSink>,
    pub events: BoxStream<'static, TransportEvent>,
}

impl std::fmt::Debug for UpstreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLink")
            .field("open", &self.sink.is_open())
            .finish_non_exhaustive()
    }
}

/// Opens upstream connections on behalf of sessions.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, target: &UpstreamTarget) -> Result<UpstreamLink, UpstreamError>;
}

/// Connector dialing the upstream over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketUpstreamConnector;

impl WebSocketUpstreamConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamConnector for WebSocketUpstreamConnector {
    async fn connect(&self, target: &UpstreamTarget) -> Result<UpstreamLink, UpstreamError> {
        let url = url::Url::parse(target.as_str())
            .map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;
        debug!("Connecting to upstream: {}", target.redacted());

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| UpstreamError::ConnectionFailed(e.to_string()))?;

        info!("Connected to upstream: {}", target.redacted());

        let (ws_sink, ws_stream) = ws_stream.split();
        let (sink, commands) = ChannelSink::new();
        spawn_writer(ws_sink, commands, to_tungstenite_message, "upstream");

        let events = ws_stream
            .filter_map(|message| async move { from_tungstenite_message(message) })
            .boxed();

        Ok(UpstreamLink {
            sink: Box::new(sink),
            events,
        })
    }
}

/// Encode a sink command as a tungstenite message.
pub fn to_tungstenite_message(command: SinkCommand) -> Message {
    match command {
        SinkCommand::Frame(RelayFrame::Text(text)) => Message::Text(text.into()),
        SinkCommand::Frame(RelayFrame::Binary(data)) => Message::Binary(data),
        SinkCommand::Close(reason) => Message::Close(reason.wire_code().map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: reason.wire_reason().to_string().into(),
        })),
    }
}

/// Map an inbound tungstenite message onto a transport event.
///
/// Control frames are handled by tungstenite itself and yield `None`.
pub fn from_tungstenite_message(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<TransportEvent> {
    match message {
        Ok(Message::Text(text)) => Some(TransportEvent::Frame(RelayFrame::Text(
            text.as_str().to_owned(),
        ))),
        Ok(Message::Binary(data)) => Some(TransportEvent::Frame(RelayFrame::Binary(data))),
        Ok(Message::Close(Some(frame))) => Some(TransportEvent::Closed(CloseReason::new(
            u16::from(frame.code),
            frame.reason.as_str(),
        ))),
        Ok(Message::Close(None)) => Some(TransportEvent::Closed(CloseReason::no_status())),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Err(e) => Some(TransportEvent::Error(e.to_string())),
    }
}
