//! Control message types exchanged as JSON text frames.
//!
//! Every control message carries a `type` discriminant. Recognized types are
//! parsed into [`ControlMessage`] and validated field by field; any other
//! type is surfaced as [`InboundControl::Unrecognized`] with its raw JSON.
//! The relay itself never parses frames; these types serve the session-init
//! handshake and the client library.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::audio::pcm::INBOUND_SAMPLE_RATE;

/// `type` values that parse into [`ControlMessage`].
pub const KNOWN_CONTROL_TYPES: &[&str] = &[
    "session.update",
    "input_audio.buffer.commit",
    "response.cancel",
    "response.delta",
    "response.completed",
    "conversation.item.input_audio_transcription.completed",
];

/// Errors raised while parsing a control message.
#[derive(Debug, Error)]
pub enum ControlMessageError {
    /// Not valid JSON
    #[error("Malformed control message: {0}")]
    Malformed(String),

    /// JSON object without a string `type`
    #[error("Control message has no type discriminant")]
    MissingType,

    /// Recognized type with fields of the wrong shape
    #[error("Invalid {kind} message: {message}")]
    InvalidShape { kind: String, message: String },

    /// Serialization failed
    #[error("Failed to serialize control message: {0}")]
    Serialization(String),
}

// =============================================================================
// Control Messages
// =============================================================================

/// A recognized control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Session configuration (client → upstream, and the relay's own init)
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    /// End of the user's audio turn
    #[serde(rename = "input_audio.buffer.commit")]
    InputAudioBufferCommit,

    /// Interrupt the response in progress
    #[serde(rename = "response.cancel")]
    ResponseCancel,

    /// Incremental response text
    #[serde(rename = "response.delta")]
    ResponseDelta {
        #[serde(default)]
        delta: ResponseDelta,
    },

    /// Final structured response
    #[serde(rename = "response.completed")]
    ResponseCompleted {
        #[serde(default)]
        response: CompletedResponse,
    },

    /// Recognized user speech
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcription: Option<String>,
    },
}

/// Result of parsing an inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundControl {
    Known(ControlMessage),
    /// Well-formed JSON whose `type` this crate does not interpret
    Unrecognized { kind: String, raw: Value },
}

impl ControlMessage {
    /// Parse a JSON text frame.
    pub fn parse(text: &str) -> Result<InboundControl, ControlMessageError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ControlMessageError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ControlMessageError::MissingType)?
            .to_string();

        if !KNOWN_CONTROL_TYPES.contains(&kind.as_str()) {
            return Ok(InboundControl::Unrecognized { kind, raw: value });
        }

        serde_json::from_value::<ControlMessage>(value)
            .map(InboundControl::Known)
            .map_err(|e| ControlMessageError::InvalidShape {
                kind,
                message: e.to_string(),
            })
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, ControlMessageError> {
        serde_json::to_string(self).map_err(|e| ControlMessageError::Serialization(e.to_string()))
    }

    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::InputAudioBufferCommit => "input_audio.buffer.commit",
            Self::ResponseCancel => "response.cancel",
            Self::ResponseDelta { .. } => "response.delta",
            Self::ResponseCompleted { .. } => "response.completed",
            Self::InputAudioTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
        }
    }

    /// Text worth showing to the user, if any.
    pub fn transcript_line(&self) -> Option<TranscriptLine> {
        let (speaker, text) = match self {
            Self::ResponseDelta { delta } => (Speaker::Assistant, delta.text.clone()?),
            Self::ResponseCompleted { response } => (Speaker::Assistant, response.joined_text()?),
            Self::InputAudioTranscriptionCompleted {
                transcript,
                transcription,
            } => (
                Speaker::User,
                transcript
                    .as_ref()
                    .filter(|t| !t.is_empty())
                    .or(transcription.as_ref())
                    .cloned()?,
            ),
            _ => return None,
        };

        if text.is_empty() {
            return None;
        }
        Some(TranscriptLine { speaker, text })
    }
}

/// Incremental text payload of `response.delta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Payload of `response.completed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletedResponse {
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

impl CompletedResponse {
    /// Text parts of the first output item joined by single spaces.
    pub fn joined_text(&self) -> Option<String> {
        let parts = &self.output.first()?.content.as_ref()?.parts;
        let text = parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<OutputContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputContent {
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Body of a `session.update` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_truncation: Option<TurnTruncation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptSettings>,
}

impl SessionUpdate {
    /// Audio and voice parameters without server-side policy. This is what a
    /// client sends on connect.
    pub fn voice_only(voice: &str, language_code: &str) -> Self {
        Self {
            response: Some(ResponseSettings::audio_and_text()),
            tts: Some(TtsSettings {
                voice: voice.to_string(),
                language_code: language_code.to_string(),
            }),
            interrupt: Some(InterruptSettings {
                enable_user_interruptions: true,
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnTruncation {
    pub max_turns: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInstruction {
    pub parts: Vec<ContentPart>,
}

impl SystemInstruction {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart {
                text: Some(text.into()),
            }],
        }
    }
}

/// Response output modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSettings {
    pub modalities: Vec<Modality>,
    pub audio_format: AudioFormat,
}

impl ResponseSettings {
    /// Audio plus text, raw 16-bit PCM at 24 kHz.
    pub fn audio_and_text() -> Self {
        Self {
            modalities: vec![Modality::Audio, Modality::Text],
            audio_format: AudioFormat::default(),
        }
    }
}

/// Output audio format descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub container: String,
    pub encoding: String,
    pub sample_rate_hz: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            container: "RAW".to_string(),
            encoding: "LINEAR16".to_string(),
            sample_rate_hz: INBOUND_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsSettings {
    pub voice: String,
    pub language_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptSettings {
    pub enable_user_interruptions: bool,
}

// =============================================================================
// Transcript Lines
// =============================================================================

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Assistant,
    User,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Assistant => write!(f, "ai"),
            Speaker::User => write!(f, "me"),
        }
    }
}

/// Displayable text extracted from an inbound control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
}
