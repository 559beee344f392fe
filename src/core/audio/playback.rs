//! Speaker playback of inbound 24 kHz PCM frames.
//!
//! Every frame is scheduled immediately on arrival. There is no jitter
//! buffer, so overlapping buffers may play concurrently.

use tracing::{trace, warn};

use super::pcm::{INBOUND_SAMPLE_RATE, PcmError, decode_pcm16};

/// A decoded mono buffer ready for the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// An audio output device.
pub trait PlaybackDevice: Send {
    /// Start playing a buffer now.
    fn play(&mut self, buffer: PlaybackBuffer);
}

impl<F> PlaybackDevice for F
where
    F: FnMut(PlaybackBuffer) + Send,
{
    fn play(&mut self, buffer: PlaybackBuffer) {
        self(buffer)
    }
}

pub struct AudioPlaybackClient<P: PlaybackDevice> {
    device: P,
    buffers_played: u64,
}

impl<P: PlaybackDevice> AudioPlaybackClient<P> {
    pub fn new(device: P) -> Self {
        Self {
            device,
            buffers_played: 0,
        }
    }

    pub fn buffers_played(&self) -> u64 {
        self.buffers_played
    }

    /// Decode one binary frame and play it. Returns the number of samples
    /// scheduled; malformed frames are rejected without playing anything.
    pub fn handle_frame(&mut self, data: &[u8]) -> Result<usize, PcmError> {
        let samples = decode_pcm16(data).inspect_err(|e| {
            warn!("Dropping inbound audio frame: {}", e);
        })?;
        if samples.is_empty() {
            return Ok(0);
        }

        let count = samples.len();
        trace!(samples = count, "Scheduling playback buffer");
        self.device.play(PlaybackBuffer {
            samples,
            sample_rate: INBOUND_SAMPLE_RATE,
        });
        self.buffers_played += 1;
        Ok(count)
    }
}
