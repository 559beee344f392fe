//! Linear PCM conversion between normalized float samples and 16-bit
//! signed little-endian wire frames.
//!
//! # Wire Format
//!
//! - Outbound (microphone → upstream): mono, 16 kHz
//! - Inbound (upstream → speaker): mono, 24 kHz
//!
//! Positive samples scale by `0x7fff`, negative samples by `0x8000`, so the
//! full `[-1.0, 1.0]` range maps onto `[i16::MIN, i16::MAX]`. Decoding
//! normalizes by `0x8000`.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Sample rate of outbound (captured) PCM frames.
pub const OUTBOUND_SAMPLE_RATE: u32 = 16000;

/// Sample rate of inbound (synthesized) PCM frames.
pub const INBOUND_SAMPLE_RATE: u32 = 24000;

/// Bytes per 16-bit sample.
pub const SAMPLE_WIDTH: usize = 2;

const POSITIVE_SCALE: f32 = 0x7fff as f32;
const NEGATIVE_SCALE: f32 = 0x8000 as f32;

/// Errors raised while interpreting PCM data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PcmError {
    /// Byte length is not a whole number of samples
    #[error("Malformed PCM frame: {len} bytes is not a multiple of the {width}-byte sample width")]
    MalformedFrame { len: usize, width: usize },
}

/// Encode normalized float samples as 16-bit little-endian PCM.
///
/// Out-of-range input is clamped to `[-1.0, 1.0]`; NaN encodes as silence.
pub fn encode_pcm16(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * SAMPLE_WIDTH);
    for &sample in samples {
        buf.put_i16_le(float_to_i16(sample));
    }
    buf.freeze()
}

/// Decode 16-bit little-endian PCM into normalized float samples.
///
/// Rejects the whole frame when its length is not a multiple of
/// [`SAMPLE_WIDTH`]; no partial decode is attempted.
pub fn decode_pcm16(data: &[u8]) -> Result<Vec<f32>, PcmError> {
    if data.len() % SAMPLE_WIDTH != 0 {
        return Err(PcmError::MalformedFrame {
            len: data.len(),
            width: SAMPLE_WIDTH,
        });
    }

    Ok(data
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / NEGATIVE_SCALE)
        .collect())
}

#[inline]
fn float_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 {
        s * NEGATIVE_SCALE
    } else {
        s * POSITIVE_SCALE
    };
    // Nearest integer; `as` saturates at the i16 bounds.
    scaled.round() as i16
}

/// A validated PCM frame: `bytes == SAMPLE_WIDTH * samples` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    data: Bytes,
    sample_rate: u32,
}

impl PcmFrame {
    /// Wrap raw wire bytes, validating the length.
    pub fn new(data: Bytes, sample_rate: u32) -> Result<Self, PcmError> {
        if data.len() % SAMPLE_WIDTH != 0 {
            return Err(PcmError::MalformedFrame {
                len: data.len(),
                width: SAMPLE_WIDTH,
            });
        }
        Ok(Self { data, sample_rate })
    }

    /// Encode float samples into a frame at the given rate.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            data: encode_pcm16(samples),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / SAMPLE_WIDTH
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.sample_count() as u64 * 1000) / self.sample_rate as u64
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Decode to normalized floats. Cannot fail: length was validated.
    pub fn to_f32(&self) -> Vec<f32> {
        self.data
            .chunks_exact(SAMPLE_WIDTH)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / NEGATIVE_SCALE)
            .collect()
    }
}
