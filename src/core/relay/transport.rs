//! Frame-level transport abstraction shared by the client-facing and
//! upstream WebSocket legs.
//!
//! A relay never touches a socket directly. Each leg is a [`FrameSink`]
//! for outbound frames plus a stream of [`TransportEvent`]s for inbound
//! ones. The concrete sink, [`ChannelSink`], enqueues onto an unbounded
//! channel drained by a writer task that owns the socket half.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::{Sink, SinkExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Peer closed without a status code. Never sent on the wire.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame. Never sent on the wire.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Server-side internal error.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// TLS handshake failure. Never sent on the wire.
pub const CLOSE_TLS_HANDSHAKE: u16 = 1015;

/// Upper bound on the UTF-8 length of a close reason (125-byte control
/// payload minus the 2-byte code).
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// One WebSocket data frame. Relayed verbatim; text and binary are never
/// converted into each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Binary(Bytes),
}

impl RelayFrame {
    pub fn is_binary(&self) -> bool {
        matches!(self, RelayFrame::Binary(_))
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            RelayFrame::Text(text) => text.len(),
            RelayFrame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Close code plus human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "")
    }

    /// Peer closed without sending a status code.
    pub fn no_status() -> Self {
        Self::new(CLOSE_NO_STATUS, "")
    }

    /// Transport ended without a close handshake.
    pub fn abnormal() -> Self {
        Self::new(CLOSE_ABNORMAL, "")
    }

    pub fn missing_credential() -> Self {
        Self::new(CLOSE_INTERNAL_ERROR, "Missing GOOGLE_API_KEY on server")
    }

    pub fn upstream_error() -> Self {
        Self::new(CLOSE_INTERNAL_ERROR, "Upstream error")
    }

    pub fn client_error() -> Self {
        Self::new(CLOSE_INTERNAL_ERROR, "Client error")
    }

    /// The code to put in an outgoing close frame, or `None` when the code
    /// is reserved or out of range and a bare close must be sent instead.
    pub fn wire_code(&self) -> Option<u16> {
        match self.code {
            CLOSE_NO_STATUS | CLOSE_ABNORMAL | CLOSE_TLS_HANDSHAKE => None,
            1000..=4999 => Some(self.code),
            _ => None,
        }
    }

    /// The reason truncated to fit a close frame, on a char boundary.
    pub fn wire_reason(&self) -> &str {
        if self.reason.len() <= MAX_CLOSE_REASON_BYTES {
            return &self.reason;
        }
        let mut end = MAX_CLOSE_REASON_BYTES;
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        &self.reason[..end]
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Inbound event from one leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(RelayFrame),
    Closed(CloseReason),
    Error(String),
}

/// Errors raised by a [`FrameSink`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,
    #[error("Failed to send frame: {0}")]
    SendFailed(String),
}

/// Outbound half of a transport leg.
///
/// `send` and `close` only enqueue; neither awaits the network.
pub trait FrameSink: Send {
    fn send(&mut self, frame: RelayFrame) -> Result<(), TransportError>;

    /// Begin the close handshake. Closing an already-closing sink is a
    /// no-op.
    fn close(&mut self, reason: CloseReason) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn send(&mut self, frame: RelayFrame) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        (**self).close(reason)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Instruction for a socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCommand {
    Frame(RelayFrame),
    Close(CloseReason),
}

/// Channel-backed [`FrameSink`].
///
/// Cloning yields another handle onto the same queue and open flag.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkCommand>,
    open: Arc<AtomicBool>,
}

impl ChannelSink {
    /// Create a sink and the receiving end a writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                open: Arc::new(AtomicBool::new(true)),
            },
            rx,
        )
    }

    /// Enqueue a frame through a shared reference.
    pub fn enqueue(&self, frame: RelayFrame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx.send(SinkCommand::Frame(frame)).map_err(|_| {
            self.open.store(false, Ordering::Release);
            TransportError::Closed
        })
    }

    /// Enqueue a close. Returns `false` when the sink was already closed.
    pub fn shutdown(&self, reason: CloseReason) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        // Writer may already be gone; nothing left to close then.
        let _ = self.tx.send(SinkCommand::Close(reason));
        true
    }

    /// Record that the peer closed so later sends fail fast.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

impl FrameSink for ChannelSink {
    fn send(&mut self, frame: RelayFrame) -> Result<(), TransportError> {
        self.enqueue(frame)
    }

    fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        self.shutdown(reason);
        Ok(())
    }

    fn is_open(&self) -> bool {
        ChannelSink::is_open(self)
    }
}

/// Spawn the task that drains `commands` into a socket sink.
///
/// `encode` maps each command onto the socket library's message type. The
/// task exits after writing a close frame, when the socket errors, or when
/// every [`ChannelSink`] handle is dropped.
pub fn spawn_writer<S, M, F>(
    mut sink: S,
    mut commands: mpsc::UnboundedReceiver<SinkCommand>,
    encode: F,
    leg: &'static str,
) -> JoinHandle<()>
where
    S: Sink<M> + Unpin + Send + 'static,
    S::Error: fmt::Display,
    M: Send + 'static,
    F: Fn(SinkCommand) -> M + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            let closing = matches!(command, SinkCommand::Close(_));
            if let Err(e) = sink.send(encode(command)).await {
                debug!("{} writer stopped: {}", leg, e);
                return;
            }
            if closing {
                break;
            }
        }
        if let Err(e) = sink.close().await {
            debug!("{} writer close: {}", leg, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_code_filters_reserved_codes() {
        assert_eq!(CloseReason::normal().wire_code(), Some(1000));
        assert_eq!(CloseReason::upstream_error().wire_code(), Some(1011));
        assert_eq!(CloseReason::new(4000, "app").wire_code(), Some(4000));
        assert_eq!(CloseReason::no_status().wire_code(), None);
        assert_eq!(CloseReason::abnormal().wire_code(), None);
        assert_eq!(CloseReason::new(1015, "").wire_code(), None);
        assert_eq!(CloseReason::new(999, "").wire_code(), None);
        assert_eq!(CloseReason::new(5000, "").wire_code(), None);
    }

    #[test]
    fn test_wire_reason_truncates_on_char_boundary() {
        let reason = CloseReason::new(1000, "é".repeat(100));
        let wire = reason.wire_reason();
        assert!(wire.len() <= MAX_CLOSE_REASON_BYTES);
        assert_eq!(wire.len(), 122);

        let short = CloseReason::client_error();
        assert_eq!(short.wire_reason(), "Client error");
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::normal().to_string(), "1000");
        assert_eq!(
            CloseReason::missing_credential().to_string(),
            "1011 (Missing GOOGLE_API_KEY on server)"
        );
    }

    #[test]
    fn test_channel_sink_enqueues_in_order() {
        let (mut sink, mut rx) = ChannelSink::new();
        sink.send(RelayFrame::Text("a".into())).unwrap();
        sink.send(RelayFrame::Binary(Bytes::from_static(&[1, 2])))
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            SinkCommand::Frame(RelayFrame::Text("a".into()))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SinkCommand::Frame(RelayFrame::Binary(Bytes::from_static(&[1, 2])))
        );
    }

    #[test]
    fn test_channel_sink_close_is_idempotent() {
        let (mut sink, mut rx) = ChannelSink::new();
        sink.close(CloseReason::normal()).unwrap();
        sink.close(CloseReason::upstream_error()).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            SinkCommand::Close(CloseReason::normal())
        );
        assert!(rx.try_recv().is_err());
        assert!(!sink.is_open());
        assert_eq!(
            sink.send(RelayFrame::Text("late".into())),
            Err(TransportError::Closed)
        );
    }

    #[test]
    fn test_channel_sink_reports_closed_when_writer_gone() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert!(!sink.is_open());
        assert_eq!(
            sink.enqueue(RelayFrame::Text("x".into())),
            Err(TransportError::Closed)
        );
    }

    #[test]
    fn test_clones_share_open_flag() {
        let (sink, _rx) = ChannelSink::new();
        let other = sink.clone();
        sink.mark_closed();
        assert!(!other.is_open());
    }

    #[tokio::test]
    async fn test_writer_stops_after_close() {
        let (sink, rx) = ChannelSink::new();
        let (tx, mut out) = futures::channel::mpsc::unbounded::<SinkCommand>();
        let handle = spawn_writer(tx, rx, |command| command, "test");

        sink.enqueue(RelayFrame::Text("hello".into())).unwrap();
        sink.shutdown(CloseReason::normal());
        handle.await.unwrap();

        use futures::StreamExt;
        assert_eq!(
            out.next().await,
            Some(SinkCommand::Frame(RelayFrame::Text("hello".into())))
        );
        assert_eq!(
            out.next().await,
            Some(SinkCommand::Close(CloseReason::normal()))
        );
        assert_eq!(out.next().await, None);
    }
}
