//! Per-connection relay state machine.
//!
//! A [`ProxySession`] pairs one client transport with at most one upstream
//! transport:
//!
//! ```text
//! Created ──begin──▶ Opening ──upstream ready──▶ Open ──any close/error──▶ Closed
//!    │                  │
//!    └─no credential────┴──upstream failure / client gone──────────────▶ Closed
//! ```
//!
//! The session never awaits. Every transition is a plain method call; the
//! async driver in [`super::driver`] feeds it events from both legs.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroize;

use super::messages::{
    ControlMessage, InterruptSettings, ResponseSettings, SessionUpdate, SystemInstruction,
    TtsSettings, TurnTruncation,
};
use super::transport::{CloseReason, FrameSink, RelayFrame};
use crate::config::{
    DEFAULT_LANGUAGE_CODE, DEFAULT_MAX_TURNS, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION,
    DEFAULT_UPSTREAM_URL, DEFAULT_VOICE, redact_key_param,
};

/// Immutable settings shared by every session a registry creates.
#[derive(Clone)]
pub struct SessionSettings {
    /// Upstream API key. Never serialized, logged or sent to clients.
    pub credential: Option<String>,
    pub model: String,
    pub upstream_url: String,
    pub voice: String,
    pub language_code: String,
    pub max_turns: u32,
    pub system_instruction: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            credential: None,
            model: DEFAULT_MODEL.to_string(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            language_code: DEFAULT_LANGUAGE_CODE.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("upstream_url", &self.upstream_url)
            .field("voice", &self.voice)
            .field("language_code", &self.language_code)
            .field("max_turns", &self.max_turns)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionSettings {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.credential {
            key.zeroize();
        }
    }
}

impl SessionSettings {
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_upstream_url(mut self, upstream_url: impl Into<String>) -> Self {
        self.upstream_url = upstream_url.into();
        self
    }

    pub fn has_credential(&self) -> bool {
        self.credential.as_deref().is_some_and(|key| !key.is_empty())
    }

    /// Build the upstream endpoint for one session.
    pub fn upstream_target(&self) -> Result<UpstreamTarget, SessionError> {
        let credential = self
            .credential
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(SessionError::MissingCredential)?;

        let url = Url::parse_with_params(
            &self.upstream_url,
            &[("model", self.model.as_str()), ("key", credential)],
        )
        .map_err(|e| SessionError::InvalidUpstreamUrl(e.to_string()))?;

        Ok(UpstreamTarget {
            url: url.into(),
        })
    }

    /// The first message every session sends upstream.
    pub fn init_message(&self) -> ControlMessage {
        ControlMessage::SessionUpdate {
            session: SessionUpdate {
                turn_truncation: Some(TurnTruncation {
                    max_turns: self.max_turns,
                }),
                system_instruction: Some(SystemInstruction::text(&self.system_instruction)),
                response: Some(ResponseSettings::audio_and_text()),
                tts: Some(TtsSettings {
                    voice: self.voice.clone(),
                    language_code: self.language_code.clone(),
                }),
                interrupt: Some(InterruptSettings {
                    enable_user_interruptions: true,
                }),
            },
        }
    }
}

/// Fully-qualified upstream URL including the credential.
///
/// `Debug` and [`UpstreamTarget::redacted`] mask the key; the URL is
/// zeroized on drop.
#[derive(Clone)]
pub struct UpstreamTarget {
    url: String,
}

impl UpstreamTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The URL to dial. Do not log this.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// The URL with the `key` parameter masked.
    pub fn redacted(&self) -> String {
        redact_key_param(&self.url)
    }
}

impl fmt::Debug for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpstreamTarget")
            .field(&self.redacted())
            .finish()
    }
}

impl Drop for UpstreamTarget {
    fn drop(&mut self) {
        self.url.zeroize();
    }
}

/// Reasons a session cannot reach the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Upstream credential is not configured")]
    MissingCredential,
    #[error("Invalid upstream URL: {0}")]
    InvalidUpstreamUrl(String),
    #[error("Session already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Opening,
    Open,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        }
    }
}

/// What happened to a frame handed to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Forwarded,
    /// Arrived before the upstream was ready.
    DroppedBeforeOpen,
    /// Destination leg already closed.
    DroppedClosed,
}

/// Frame and close counters, reported when the session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub client_frames_forwarded: u64,
    pub upstream_frames_forwarded: u64,
    pub frames_dropped_before_open: u64,
    pub close: Option<CloseReason>,
}

/// One client connection and its upstream counterpart.
pub struct ProxySession<C: FrameSink, U: FrameSink> {
    id: String,
    state: SessionState,
    client: C,
    upstream: Option<U>,
    client_closed: bool,
    upstream_closed: bool,
    opened: bool,
    summary: SessionSummary,
}

impl<C: FrameSink, U: FrameSink> ProxySession<C, U> {
    pub fn new(id: impl Into<String>, client: C) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Created,
            client,
            upstream: None,
            client_closed: false,
            upstream_closed: false,
            opened: false,
            summary: SessionSummary::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Whether the upstream handshake has happened.
    pub fn has_opened(&self) -> bool {
        self.opened
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn upstream(&self) -> Option<&U> {
        self.upstream.as_ref()
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Created → Opening.
    ///
    /// Resolves the upstream target. Without a credential the client is
    /// closed with 1011 and the connector must never be invoked.
    pub fn begin(&mut self, settings: &SessionSettings) -> Result<UpstreamTarget, SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::AlreadyStarted);
        }

        match settings.upstream_target() {
            Ok(target) => {
                self.state = SessionState::Opening;
                info!(
                    session_id = %self.id,
                    upstream = %target.redacted(),
                    "Opening upstream connection"
                );
                Ok(target)
            }
            Err(SessionError::MissingCredential) => {
                warn!(session_id = %self.id, "Rejecting session: upstream credential missing");
                self.upstream_closed = true;
                self.close_both(CloseReason::missing_credential());
                Err(SessionError::MissingCredential)
            }
            Err(e) => {
                warn!(session_id = %self.id, "Rejecting session: {}", e);
                self.upstream_closed = true;
                self.close_both(CloseReason::upstream_error());
                Err(e)
            }
        }
    }

    /// Opening → Open: adopt the upstream transport and send exactly one
    /// initial `session.update`.
    pub fn on_upstream_ready(&mut self, mut upstream: U, init: &ControlMessage) {
        if self.state != SessionState::Opening {
            debug!(
                session_id = %self.id,
                state = self.state.as_str(),
                "Discarding upstream that opened after session ended"
            );
            let _ = upstream.close(CloseReason::normal());
            return;
        }

        let sent = init
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|json| upstream.send(RelayFrame::Text(json)).map_err(|e| e.to_string()));

        self.upstream = Some(upstream);
        self.opened = true;

        match sent {
            Ok(()) => {
                self.state = SessionState::Open;
                info!(session_id = %self.id, "Upstream open, session initialised");
            }
            Err(e) => {
                warn!(session_id = %self.id, "Failed to send session init: {}", e);
                self.close_both(CloseReason::upstream_error());
            }
        }
    }

    /// Client → upstream. Frames before Open are dropped silently.
    pub fn on_client_frame(&mut self, frame: RelayFrame) -> FrameDisposition {
        match self.state {
            SessionState::Created | SessionState::Opening => {
                self.summary.frames_dropped_before_open += 1;
                debug!(
                    session_id = %self.id,
                    bytes = frame.len(),
                    "Dropping client frame before upstream is open"
                );
                FrameDisposition::DroppedBeforeOpen
            }
            SessionState::Closed => FrameDisposition::DroppedClosed,
            SessionState::Open => {
                let Some(upstream) = self.upstream.as_mut() else {
                    return FrameDisposition::DroppedClosed;
                };
                if !upstream.is_open() {
                    return FrameDisposition::DroppedClosed;
                }
                match upstream.send(frame) {
                    Ok(()) => {
                        self.summary.client_frames_forwarded += 1;
                        FrameDisposition::Forwarded
                    }
                    Err(e) => {
                        debug!(session_id = %self.id, "Upstream send failed: {}", e);
                        FrameDisposition::DroppedClosed
                    }
                }
            }
        }
    }

    /// Upstream → client, forwarded whenever the client is still open.
    pub fn on_upstream_frame(&mut self, frame: RelayFrame) -> FrameDisposition {
        if self.state == SessionState::Closed || self.client_closed || !self.client.is_open() {
            return FrameDisposition::DroppedClosed;
        }
        match self.client.send(frame) {
            Ok(()) => {
                self.summary.upstream_frames_forwarded += 1;
                FrameDisposition::Forwarded
            }
            Err(e) => {
                debug!(session_id = %self.id, "Client send failed: {}", e);
                FrameDisposition::DroppedClosed
            }
        }
    }

    /// Client closed: mirror its code and reason upstream.
    pub fn on_client_closed(&mut self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        info!(session_id = %self.id, close = %reason, "Client closed");
        self.client_closed = true;
        self.close_both(reason);
    }

    /// Client transport error: close upstream with 1011 "Client error".
    pub fn on_client_error(&mut self, error: &str) {
        if self.is_closed() {
            return;
        }
        warn!(session_id = %self.id, "Client transport error: {}", error);
        self.client_closed = true;
        self.close_both(CloseReason::client_error());
    }

    /// Upstream closed: mirror its code and reason to the client.
    pub fn on_upstream_closed(&mut self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        info!(session_id = %self.id, close = %reason, "Upstream closed");
        self.upstream_closed = true;
        self.close_both(reason);
    }

    /// Upstream error, including a failed connect: close both with 1011.
    pub fn on_upstream_error(&mut self, error: &str) {
        if self.is_closed() {
            return;
        }
        warn!(session_id = %self.id, "Upstream error: {}", error);
        self.upstream_closed = true;
        self.close_both(CloseReason::upstream_error());
    }

    /// Close whichever legs are still open. Idempotent; close errors are
    /// swallowed.
    pub fn close_both(&mut self, reason: CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        if !self.client_closed {
            self.client_closed = true;
            if let Err(e) = self.client.close(reason.clone()) {
                debug!(session_id = %self.id, "Ignoring client close error: {}", e);
            }
        }
        if !self.upstream_closed {
            self.upstream_closed = true;
            if let Some(upstream) = self.upstream.as_mut()
                && let Err(e) = upstream.close(reason.clone())
            {
                debug!(session_id = %self.id, "Ignoring upstream close error: {}", e);
            }
        }

        self.summary.close = Some(reason);
    }
}
