//! Microphone capture pipeline.
//!
//! Each native-rate block from the device is decimated to 16 kHz, encoded as
//! PCM16 and, only while talking and while the transport is open, handed to
//! the outbound queue. Blocks are never buffered for later.

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info};

use super::downsampler::Downsampler;
use super::pcm::encode_pcm16;
use super::talk::TalkState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Capture is already running")]
    AlreadyRunning,
    #[error("Capture is not running")]
    NotRunning,
    #[error("Cannot capture: outbound connection is closed")]
    Disconnected,
}

/// An audio input device delivering mono float blocks.
pub trait CaptureDevice: Send {
    /// Native sample rate of the blocks the device delivers.
    fn sample_rate(&self) -> u32;

    /// Release the underlying hardware. Called once when capture stops.
    fn release(&mut self);
}

/// Destination for encoded microphone frames.
///
/// Implementations must only enqueue; `send_audio` is called from the
/// capture callback.
pub trait OutboundAudio: Send + Sync {
    fn is_open(&self) -> bool;

    /// Enqueue one PCM16 frame. Returns `false` if it was not accepted.
    fn send_audio(&self, pcm: Bytes) -> bool;
}

/// Result of processing one capture block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// A frame of this many bytes was enqueued.
    Sent(usize),
    /// The decimator produced no samples for this block.
    Empty,
    /// Not talking; frame discarded.
    Muted,
    /// Transport not open; frame discarded.
    Disconnected,
    /// Capture is not running.
    Inactive,
}

struct ActiveCapture {
    device: Box<dyn CaptureDevice>,
    downsampler: Downsampler,
}

pub struct AudioCaptureClient<O: OutboundAudio> {
    talk: TalkState,
    outbound: O,
    active: Option<ActiveCapture>,
    frames_sent: u64,
}

impl<O: OutboundAudio> AudioCaptureClient<O> {
    pub fn new(talk: TalkState, outbound: O) -> Self {
        Self {
            talk,
            outbound,
            active: None,
            frames_sent: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn outbound(&self) -> &O {
        &self.outbound
    }

    /// Arm capture on a device. A second start without a stop is rejected.
    pub fn start(&mut self, device: Box<dyn CaptureDevice>) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        let native_rate = device.sample_rate();
        info!(native_rate, "Starting audio capture");
        self.active = Some(ActiveCapture {
            device,
            downsampler: Downsampler::new(native_rate),
        });
        Ok(())
    }

    /// Stop capture and release the device.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        let mut active = self.active.take().ok_or(CaptureError::NotRunning)?;
        active.device.release();
        info!(frames_sent = self.frames_sent, "Stopped audio capture");
        Ok(())
    }

    /// Process one native-rate block from the device callback.
    pub fn process_block(&mut self, block: &[f32]) -> BlockOutcome {
        let Some(active) = self.active.as_mut() else {
            return BlockOutcome::Inactive;
        };

        // Decimate unconditionally so the fractional phase stays continuous.
        let samples = active.downsampler.process(block);
        if samples.is_empty() {
            return BlockOutcome::Empty;
        }
        if !self.talk.is_talking() {
            return BlockOutcome::Muted;
        }
        if !self.outbound.is_open() {
            return BlockOutcome::Disconnected;
        }

        let pcm = encode_pcm16(&samples);
        let len = pcm.len();
        if self.outbound.send_audio(pcm) {
            self.frames_sent += 1;
            BlockOutcome::Sent(len)
        } else {
            debug!("Outbound rejected capture frame");
            BlockOutcome::Disconnected
        }
    }
}

impl<O: OutboundAudio> Drop for AudioCaptureClient<O> {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.device.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::talk::TalkStateMachine;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeDevice {
        rate: u32,
        released: Arc<AtomicUsize>,
    }

    impl CaptureDevice for FakeDevice {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct FakeOutbound {
        closed: Arc<AtomicBool>,
        frames: Arc<Mutex<Vec<Bytes>>>,
    }

    impl OutboundAudio for FakeOutbound {
        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }

        fn send_audio(&self, pcm: Bytes) -> bool {
            self.frames.lock().push(pcm);
            true
        }
    }

    fn device(rate: u32) -> (Box<dyn CaptureDevice>, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        (
            Box::new(FakeDevice {
                rate,
                released: released.clone(),
            }),
            released,
        )
    }

    #[test]
    fn test_sends_only_while_talking() {
        let talk = TalkStateMachine::new();
        let outbound = FakeOutbound::default();
        let mut capture = AudioCaptureClient::new(talk.state(), outbound.clone());
        let (dev, _) = device(48000);
        capture.start(dev).unwrap();

        assert_eq!(capture.process_block(&[0.0; 48]), BlockOutcome::Muted);
        talk.start();
        assert_eq!(capture.process_block(&[0.0; 48]), BlockOutcome::Sent(32));
        talk.stop();
        assert_eq!(capture.process_block(&[0.0; 48]), BlockOutcome::Muted);

        assert_eq!(outbound.frames.lock().len(), 1);
        assert_eq!(capture.frames_sent(), 1);
    }

    #[test]
    fn test_discards_when_transport_closed() {
        let talk = TalkStateMachine::new();
        let outbound = FakeOutbound::default();
        outbound.closed.store(true, Ordering::SeqCst);
        let mut capture = AudioCaptureClient::new(talk.state(), outbound.clone());
        let (dev, _) = device(16000);
        capture.start(dev).unwrap();
        talk.toggle();

        assert_eq!(capture.process_block(&[0.1; 16]), BlockOutcome::Disconnected);
        assert!(outbound.frames.lock().is_empty());
    }

    #[test]
    fn test_double_start_rejected_and_stop_releases() {
        let mut capture =
            AudioCaptureClient::new(TalkStateMachine::new().state(), FakeOutbound::default());
        let (first, released) = device(48000);
        let (second, _) = device(48000);

        capture.start(first).unwrap();
        assert_eq!(capture.start(second), Err(CaptureError::AlreadyRunning));

        capture.stop().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(capture.stop(), Err(CaptureError::NotRunning));
        assert_eq!(capture.process_block(&[0.0; 48]), BlockOutcome::Inactive);
    }

    #[test]
    fn test_drop_releases_device() {
        let (dev, released) = device(44100);
        {
            let mut capture =
                AudioCaptureClient::new(TalkStateMachine::new().state(), FakeOutbound::default());
            capture.start(dev).unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tiny_block_yields_nothing() {
        let talk = TalkStateMachine::new();
        talk.start();
        let mut capture = AudioCaptureClient::new(talk.state(), FakeOutbound::default());
        let (dev, _) = device(48000);
        capture.start(dev).unwrap();
        assert_eq!(capture.process_block(&[0.5, 0.5]), BlockOutcome::Empty);
    }
}
