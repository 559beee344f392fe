//! Client-side audio pipeline: capture, decimation, PCM16 framing, talk
//! gating and playback.

pub mod capture;
pub mod downsampler;
pub mod pcm;
pub mod playback;
pub mod talk;

pub use capture::{AudioCaptureClient, BlockOutcome, CaptureDevice, CaptureError, OutboundAudio};
pub use downsampler::Downsampler;
pub use pcm::{
    INBOUND_SAMPLE_RATE, OUTBOUND_SAMPLE_RATE, PcmError, PcmFrame, SAMPLE_WIDTH, decode_pcm16,
    encode_pcm16,
};
pub use playback::{AudioPlaybackClient, PlaybackBuffer, PlaybackDevice};
pub use talk::{TalkMode, TalkState, TalkStateMachine};
