//! Credential-hiding WebSocket relay.
//!
//! Each client connection gets its own [`ProxySession`] paired with a fresh
//! upstream connection. Frames are forwarded verbatim in both directions;
//! the relay only originates the initial `session.update` and close frames.

pub mod driver;
pub mod messages;
pub mod registry;
pub mod session;
pub mod transport;
pub mod upstream;

pub use driver::run_session;
pub use messages::{
    ControlMessage, ControlMessageError, InboundControl, SessionUpdate, Speaker, TranscriptLine,
};
pub use registry::RelaySessionRegistry;
pub use session::{
    FrameDisposition, ProxySession, SessionError, SessionSettings, SessionState, SessionSummary,
    UpstreamTarget,
};
pub use transport::{
    ChannelSink, CloseReason, FrameSink, RelayFrame, SinkCommand, TransportError, TransportEvent,
};
pub use upstream::{UpstreamConnector, UpstreamError, UpstreamLink, WebSocketUpstreamConnector};
