pub mod audio;
pub mod client;
pub mod relay;

// Re-export commonly used types for convenience
pub use audio::{
    AudioCaptureClient, AudioPlaybackClient, CaptureDevice, Downsampler, PcmError, PcmFrame,
    PlaybackDevice, TalkStateMachine,
};
pub use client::{ClientEvent, ClientOutbound, LiveClient, LiveClientConfig};
pub use relay::{
    CloseReason, ControlMessage, FrameSink, ProxySession, RelayFrame, RelaySessionRegistry,
    SessionSettings, UpstreamConnector, WebSocketUpstreamConnector,
};
