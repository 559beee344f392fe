//! Client-side connection to the relay.
//!
//! [`LiveClient`] owns the WebSocket in two tasks: a writer draining the
//! outbound queue and a reader routing binary frames to playback and text
//! frames to transcript events. Everything else talks to the socket through
//! the enqueue-only [`ClientOutbound`] handle.
//!
//! The client also owns the capture pipeline. When the connection ends, for
//! whatever reason, capture is stopped and the device released.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_LANGUAGE_CODE, DEFAULT_VOICE};
use crate::core::audio::{
    AudioCaptureClient, AudioPlaybackClient, BlockOutcome, CaptureDevice, CaptureError,
    OutboundAudio, PlaybackDevice, TalkStateMachine,
};
use crate::core::relay::transport::spawn_writer;
use crate::core::relay::upstream::{from_tungstenite_message, to_tungstenite_message};
use crate::core::relay::{
    ChannelSink, CloseReason, ControlMessage, InboundControl, RelayFrame, SessionUpdate,
    TranscriptLine, TransportError, TransportEvent,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Failed to connect to relay: {0}")]
    ConnectionFailed(String),
}

/// Connection parameters for [`LiveClient::connect`].
#[derive(Debug, Clone)]
pub struct LiveClientConfig {
    /// Relay endpoint, e.g. `ws://localhost:8080/live`
    pub url: String,
    pub voice: String,
    pub language_code: String,
}

impl LiveClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            voice: DEFAULT_VOICE.to_string(),
            language_code: DEFAULT_LANGUAGE_CODE.to_string(),
        }
    }
}

/// Events surfaced by the reader task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Transcript(TranscriptLine),
    /// The relay connection ended; capture should stop.
    Closed(Option<CloseReason>),
}

/// Enqueue-only handle onto the relay connection.
#[derive(Debug, Clone)]
pub struct ClientOutbound {
    sink: ChannelSink,
}

impl ClientOutbound {
    pub fn new(sink: ChannelSink) -> Self {
        Self { sink }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    pub fn send_pcm(&self, pcm: Bytes) -> Result<(), TransportError> {
        self.sink.enqueue(RelayFrame::Binary(pcm))
    }

    pub fn send_control(&self, message: &ControlMessage) -> Result<(), TransportError> {
        let json = message
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.sink.enqueue(RelayFrame::Text(json))
    }

    /// Ask the assistant to stop speaking. Sent only while connected;
    /// returns whether it was enqueued.
    pub fn interrupt(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.send_control(&ControlMessage::ResponseCancel).is_ok()
    }

    /// Close the connection normally. The writer sends the close frame and
    /// exits; later calls are no-ops.
    pub fn close(&self) {
        self.sink.shutdown(CloseReason::normal());
    }
}

impl OutboundAudio for ClientOutbound {
    fn is_open(&self) -> bool {
        ClientOutbound::is_open(self)
    }

    fn send_audio(&self, pcm: Bytes) -> bool {
        self.send_pcm(pcm).is_ok()
    }
}

type SharedCapture = Arc<Mutex<AudioCaptureClient<ClientOutbound>>>;

/// A live conversation with the relay.
pub struct LiveClient {
    outbound: ClientOutbound,
    talk: TalkStateMachine,
    capture: SharedCapture,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    reader: JoinHandle<()>,
}

impl LiveClient {
    /// Connect to the relay, start the socket tasks and send the client's
    /// own `session.update`.
    pub async fn connect<P>(config: LiveClientConfig, playback: P) -> Result<Self, ClientError>
    where
        P: PlaybackDevice + 'static,
    {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(config.url.as_str())
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        info!("Connected to relay at {}", config.url);

        let (ws_sink, ws_stream) = ws_stream.split();
        let (sink, commands) = ChannelSink::new();
        spawn_writer(ws_sink, commands, to_tungstenite_message, "client");
        let outbound = ClientOutbound::new(sink);

        let talk = TalkStateMachine::new();
        let capture = Arc::new(Mutex::new(AudioCaptureClient::new(
            talk.state(),
            outbound.clone(),
        )));

        let (events_tx, events) = mpsc::unbounded_channel();
        let inbound = ws_stream
            .filter_map(|message| async move { from_tungstenite_message(message) })
            .boxed();
        let reader = tokio::spawn(read_relay(
            inbound,
            AudioPlaybackClient::new(playback),
            events_tx,
            outbound.clone(),
            capture.clone(),
        ));

        let client = Self {
            outbound,
            talk,
            capture,
            events,
            reader,
        };

        let update = ControlMessage::SessionUpdate {
            session: SessionUpdate::voice_only(&config.voice, &config.language_code),
        };
        if let Err(e) = client.outbound.send_control(&update) {
            debug!("Could not send client session.update: {}", e);
        }

        Ok(client)
    }

    pub fn outbound(&self) -> ClientOutbound {
        self.outbound.clone()
    }

    pub fn talk(&self) -> &TalkStateMachine {
        &self.talk
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_open()
    }

    /// Arm capture on a device, gated by this client's talk state.
    ///
    /// Rejected once the connection has closed, so a device is never held
    /// without a transport behind it.
    pub fn start_capture(&self, device: Box<dyn CaptureDevice>) -> Result<(), CaptureError> {
        start_shared_capture(&self.capture, device)
    }

    /// Feed one native-rate block from the device callback.
    pub fn process_block(&self, block: &[f32]) -> BlockOutcome {
        self.capture.lock().process_block(block)
    }

    /// Stop capture and release the device.
    pub fn stop_capture(&self) -> Result<(), CaptureError> {
        self.capture.lock().stop()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.lock().is_running()
    }

    /// Hold gesture pressed.
    pub fn hold_start(&self) {
        self.emit(self.talk.start());
    }

    /// Hold gesture released: commits the turn.
    pub fn hold_stop(&self) {
        self.emit(self.talk.stop());
    }

    /// Hold gesture abandoned.
    pub fn hold_cancel(&self) {
        self.emit(self.talk.cancel());
    }

    /// Tap gesture.
    pub fn toggle_talk(&self) {
        self.emit(self.talk.toggle());
    }

    /// Ask the assistant to stop speaking. Talk state is left untouched.
    pub fn interrupt(&self) -> bool {
        self.outbound.interrupt()
    }

    /// Next transcript or close event; `None` once the reader has finished
    /// and every event was consumed.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Release the capture device and close the connection.
    pub fn disconnect(&self) {
        release_capture(&self.capture);
        self.outbound.close();
    }

    fn emit(&self, message: Option<ControlMessage>) {
        if let Some(message) = message
            && let Err(e) = self.outbound.send_control(&message)
        {
            debug!("Dropping {}: {}", message.kind(), e);
        }
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.disconnect();
        self.reader.abort();
    }
}

/// Start capture while holding the capture lock, so a concurrent teardown
/// either sees the running capture or the start sees the closed transport.
fn start_shared_capture(
    capture: &SharedCapture,
    device: Box<dyn CaptureDevice>,
) -> Result<(), CaptureError> {
    let mut capture = capture.lock();
    if !capture.outbound().is_open() {
        return Err(CaptureError::Disconnected);
    }
    capture.start(device)
}

fn release_capture(capture: &SharedCapture) {
    if capture.lock().stop().is_ok() {
        debug!("Released capture device");
    }
}

/// Reader task body: route inbound frames until the relay connection ends,
/// then close the writer, release capture and report the close.
async fn read_relay<S, P>(
    mut inbound: S,
    mut playback: AudioPlaybackClient<P>,
    events: mpsc::UnboundedSender<ClientEvent>,
    outbound: ClientOutbound,
    capture: SharedCapture,
) where
    S: Stream<Item = TransportEvent> + Unpin,
    P: PlaybackDevice,
{
    let mut close = None;
    while let Some(event) = inbound.next().await {
        match event {
            TransportEvent::Frame(RelayFrame::Binary(data)) => {
                // Malformed frames are logged and skipped
                let _ = playback.handle_frame(&data);
            }
            TransportEvent::Frame(RelayFrame::Text(text)) => {
                if let Some(line) = transcript_from_text(&text) {
                    let _ = events.send(ClientEvent::Transcript(line));
                }
            }
            TransportEvent::Closed(reason) => {
                info!(close = %reason, "Relay closed the connection");
                close = Some(reason);
                break;
            }
            TransportEvent::Error(e) => {
                warn!("Relay connection error: {}", e);
                break;
            }
        }
    }

    // Closing first makes any racing start_capture fail.
    outbound.close();
    release_capture(&capture);
    let _ = events.send(ClientEvent::Closed(close));
}

/// Parse a text frame into a transcript line, skipping anything else.
fn transcript_from_text(text: &str) -> Option<TranscriptLine> {
    match ControlMessage::parse(text) {
        Ok(InboundControl::Known(message)) => message.transcript_line(),
        Ok(InboundControl::Unrecognized { kind, .. }) => {
            debug!("Ignoring relay message of type {}", kind);
            None
        }
        Err(e) => {
            debug!("Skipping unparseable relay message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::PlaybackBuffer;
    use crate::core::relay::{SinkCommand, Speaker};
    use futures::channel::mpsc as inbound;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDevice {
        released: Arc<AtomicUsize>,
    }

    impl CaptureDevice for CountingDevice {
        fn sample_rate(&self) -> u32 {
            48000
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn armed_capture(
        outbound: &ClientOutbound,
        talk: &TalkStateMachine,
    ) -> (SharedCapture, Arc<AtomicUsize>) {
        let capture = Arc::new(Mutex::new(AudioCaptureClient::new(
            talk.state(),
            outbound.clone(),
        )));
        let released = Arc::new(AtomicUsize::new(0));
        start_shared_capture(
            &capture,
            Box::new(CountingDevice {
                released: released.clone(),
            }),
        )
        .unwrap();
        (capture, released)
    }

    async fn run_reader(
        events: Vec<TransportEvent>,
        outbound: &ClientOutbound,
        capture: &SharedCapture,
    ) -> Vec<ClientEvent> {
        let (tx, rx) = inbound::unbounded();
        for event in events {
            tx.unbounded_send(event).unwrap();
        }
        drop(tx);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        read_relay(
            rx,
            AudioPlaybackClient::new(|_buffer: PlaybackBuffer| {}),
            events_tx,
            outbound.clone(),
            capture.clone(),
        )
        .await;

        let mut seen = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn test_relay_close_releases_capture_and_closes_writer() {
        let (sink, mut commands) = ChannelSink::new();
        let outbound = ClientOutbound::new(sink);
        let talk = TalkStateMachine::new();
        let (capture, released) = armed_capture(&outbound, &talk);
        talk.start();

        let seen = run_reader(
            vec![TransportEvent::Closed(CloseReason::no_status())],
            &outbound,
            &capture,
        )
        .await;

        assert_eq!(
            seen,
            vec![ClientEvent::Closed(Some(CloseReason::no_status()))]
        );
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!capture.lock().is_running());
        assert_eq!(capture.lock().process_block(&[0.5; 48]), BlockOutcome::Inactive);

        // The writer is told to finish even though the peer closed first
        assert_eq!(
            commands.try_recv().unwrap(),
            SinkCommand::Close(CloseReason::normal())
        );
        assert!(!outbound.is_open());
    }

    #[tokio::test]
    async fn test_relay_error_releases_capture() {
        let (sink, mut commands) = ChannelSink::new();
        let outbound = ClientOutbound::new(sink);
        let talk = TalkStateMachine::new();
        let (capture, released) = armed_capture(&outbound, &talk);

        let seen = run_reader(
            vec![
                TransportEvent::Frame(RelayFrame::Text(
                    r#"{"type":"response.delta","delta":{"text":"Hi"}}"#.into(),
                )),
                TransportEvent::Error("connection reset".into()),
            ],
            &outbound,
            &capture,
        )
        .await;

        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], ClientEvent::Transcript(_)));
        assert_eq!(seen[1], ClientEvent::Closed(None));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(
            commands.try_recv().unwrap(),
            SinkCommand::Close(CloseReason::normal())
        );
    }

    #[tokio::test]
    async fn test_stream_end_releases_capture_once() {
        let (sink, _commands) = ChannelSink::new();
        let outbound = ClientOutbound::new(sink);
        let talk = TalkStateMachine::new();
        let (capture, released) = armed_capture(&outbound, &talk);

        let seen = run_reader(Vec::new(), &outbound, &capture).await;
        assert_eq!(seen, vec![ClientEvent::Closed(None)]);

        // A later disconnect finds nothing left to release
        release_capture(&capture);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capture_cannot_start_after_close() {
        let (sink, _commands) = ChannelSink::new();
        let outbound = ClientOutbound::new(sink);
        let talk = TalkStateMachine::new();
        let capture = Arc::new(Mutex::new(AudioCaptureClient::new(
            talk.state(),
            outbound.clone(),
        )));
        outbound.close();

        let released = Arc::new(AtomicUsize::new(0));
        let result = start_shared_capture(
            &capture,
            Box::new(CountingDevice {
                released: released.clone(),
            }),
        );
        assert_eq!(result, Err(CaptureError::Disconnected));
        assert!(!capture.lock().is_running());
    }

    #[test]
    fn test_interrupt_while_talking_keeps_talk_state() {
        let (sink, mut commands) = ChannelSink::new();
        let outbound = ClientOutbound::new(sink);
        let cancel = SinkCommand::Frame(RelayFrame::Text(r#"{"type":"response.cancel"}"#.into()));

        let held = TalkStateMachine::new();
        held.start();
        assert!(outbound.interrupt());
        assert!(held.is_talking());
        assert_eq!(commands.try_recv().unwrap(), cancel);

        let toggled = TalkStateMachine::new();
        toggled.toggle();
        assert!(outbound.interrupt());
        assert!(toggled.is_talking());
        assert_eq!(commands.try_recv().unwrap(), cancel);
    }

    #[test]
    fn test_interrupt_only_when_open() {
        let (sink, mut commands) = ChannelSink::new();
        let outbound = ClientOutbound::new(sink);

        assert!(outbound.interrupt());
        match commands.try_recv().unwrap() {
            SinkCommand::Frame(RelayFrame::Text(text)) => {
                assert_eq!(text, r#"{"type":"response.cancel"}"#)
            }
            other => panic!("unexpected command {other:?}"),
        }

        outbound.close();
        assert!(!outbound.interrupt());
        assert_eq!(
            commands.try_recv().unwrap(),
            SinkCommand::Close(CloseReason::normal())
        );
        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn test_outbound_audio_is_binary() {
        let (sink, mut commands) = ChannelSink::new();
        let outbound = ClientOutbound::new(sink);
        assert!(outbound.send_audio(Bytes::from_static(&[1, 0])));
        assert_eq!(
            commands.try_recv().unwrap(),
            SinkCommand::Frame(RelayFrame::Binary(Bytes::from_static(&[1, 0])))
        );
    }

    #[test]
    fn test_transcript_from_text() {
        let line =
            transcript_from_text(r#"{"type":"response.delta","delta":{"text":"Hello"}}"#).unwrap();
        assert_eq!(line.speaker, Speaker::Assistant);
        assert_eq!(line.text, "Hello");

        let line = transcript_from_text(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"book a ride"}"#,
        )
        .unwrap();
        assert_eq!(line.speaker, Speaker::User);

        assert!(transcript_from_text("not json").is_none());
        assert!(transcript_from_text(r#"{"type":"session.created"}"#).is_none());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let result = LiveClient::connect(
            LiveClientConfig::new("ws://127.0.0.1:9/live"),
            |_buffer: PlaybackBuffer| {},
        )
        .await;
        assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
    }
}
