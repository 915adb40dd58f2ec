//! Wire messages exchanged with the companion service.
//!
//! Text frames carry one JSON object tagged by `type`; binary frames carry
//! raw PCM16 audio in both directions.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::FragmentFormat;
use crate::error::ProtocolError;

// =============================================================================
// Outbound (client -> service)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Typed chat message
    UserTextMessage { text: String },

    /// Push-to-talk pressed; audio frames follow
    SpeechStart,

    /// Push-to-talk released; the service commits the audio buffer
    SpeechEnd,

    /// Ask the service to stop the current response
    Stop,

    /// Sent after every re-open within one session
    Reconnect,
}

impl OutboundMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        OutboundMessage::UserTextMessage { text: text.into() }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Inbound (service -> client)
// =============================================================================

fn default_chunk_format() -> FragmentFormat {
    FragmentFormat::Mp3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Streamed assistant text
    TextDelta { content: String },

    TextDone,

    /// One encoded assistant audio fragment
    AudioChunk {
        /// Base64 payload
        audio: String,
        #[serde(default = "default_chunk_format")]
        format: FragmentFormat,
    },

    /// Streamed transcript of the user's own speech
    InputAudioTranscriptDelta { content: String },

    InputAudioTranscriptDone,

    /// The service accepted a user utterance; a new turn begins
    InputAudioBufferCommitted,

    Error { message: String },

    /// Informational notice from the service
    Status { message: String },

    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session_id: Option<String>,
    },
}

impl InboundMessage {
    pub const TYPES: &'static [&'static str] = &[
        "text_delta",
        "text_done",
        "audio_chunk",
        "input_audio_transcript_delta",
        "input_audio_transcript_done",
        "input_audio_buffer_committed",
        "error",
        "status",
        "session.created",
    ];

    /// Decode one text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        if !Self::TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}

/// One demultiplexed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Message(InboundMessage),
    /// Raw binary frame: a playable PCM16 fragment
    Audio(Bytes),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_unit_messages_carry_only_type() {
        assert_eq!(
            OutboundMessage::SpeechStart.to_json().unwrap(),
            r#"{"type":"speech_start"}"#
        );
        assert_eq!(
            OutboundMessage::Reconnect.to_json().unwrap(),
            r#"{"type":"reconnect"}"#
        );
    }

    #[test]
    fn test_audio_chunk_format_defaults_to_mp3() {
        let msg = InboundMessage::parse(r#"{"type":"audio_chunk","audio":"AAAA"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::AudioChunk {
                audio: "AAAA".to_string(),
                format: FragmentFormat::Mp3
            }
        );

        let wav = InboundMessage::parse(r#"{"type":"audio_chunk","audio":"AAAA","format":"wav"}"#).unwrap();
        assert!(matches!(wav, InboundMessage::AudioChunk { format: FragmentFormat::Wav, .. }));
    }

    #[test]
    fn test_dotted_session_created_type() {
        let msg = InboundMessage::parse(r#"{"type":"session.created"}"#).unwrap();
        assert_eq!(msg, InboundMessage::SessionCreated { session_id: None });
    }

    #[test]
    fn test_parse_errors_are_classified() {
        assert!(matches!(InboundMessage::parse("{not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            InboundMessage::parse(r#"{"content":"x"}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"type":"response.done"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "response.done"
        ));
        // Known type with a missing field
        assert!(matches!(
            InboundMessage::parse(r#"{"type":"text_delta"}"#),
            Err(ProtocolError::Json(_))
        ));
    }
}
