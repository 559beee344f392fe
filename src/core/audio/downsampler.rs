//! Nearest-sample decimator from the capture device's native rate down to
//! the 16 kHz outbound rate.
//!
//! This is not a band-limited resampler: content above 8 kHz aliases. The
//! trade-off keeps the per-block work to a single pass with no filter state.

use super::pcm::OUTBOUND_SAMPLE_RATE;

/// Accumulator-based decimator.
///
/// For every native sample the accumulator grows by one; once it reaches
/// `ratio` the sample is kept and `ratio` is subtracted. The fractional
/// remainder carries across blocks, so output length per block varies.
#[derive(Debug, Clone)]
pub struct Downsampler {
    native_rate: u32,
    ratio: f64,
    acc: f64,
}

impl Downsampler {
    /// Create a decimator for the given native rate targeting 16 kHz.
    ///
    /// Native rates at or below the target pass through unchanged.
    pub fn new(native_rate: u32) -> Self {
        Self::with_target(native_rate, OUTBOUND_SAMPLE_RATE)
    }

    pub fn with_target(native_rate: u32, target_rate: u32) -> Self {
        let ratio = if target_rate == 0 {
            1.0
        } else {
            (native_rate as f64 / target_rate as f64).max(1.0)
        };
        Self {
            native_rate,
            ratio,
            acc: 0.0,
        }
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Decimate one native-rate block.
    pub fn process(&mut self, block: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity((block.len() as f64 / self.ratio).ceil() as usize);
        for &sample in block {
            self.acc += 1.0;
            if self.acc >= self.ratio {
                self.acc -= self.ratio;
                out.push(sample);
            }
        }
        out
    }

    /// Drop the carried fractional position.
    pub fn reset(&mut self) {
        self.acc = 0.0;
    }
}
