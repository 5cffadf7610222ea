//! Voice WebSocket control protocol.
//!
//! Client to server, text frames only:
//!
//! ```json
//! { "type": "tts", "text": "Hello", "voice": "en-US-AriaNeural", "rate": "+0%", "volume": "+0%" }
//! ```
//!
//! `voice`, `rate` and `volume` are optional. Other `type` values are
//! accepted and ignored.
//!
//! Server to client: binary frames carrying audio, and error frames:
//!
//! ```json
//! { "type": "error", "kind": "synthesis_error", "message": "TTS Error: ..." }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tts_core::AudioChunk;

use crate::error::{ErrorKind, SessionError};

/// Fields of a `"tts"` message.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct TtsCommand {
    /// Absent and empty are treated the same.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub rate: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Tts(TtsCommand),
    /// Any other (or missing) `type`.
    Ignored(Option<String>),
}

pub fn parse_control(raw: &str) -> Result<ControlMessage, SessionError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|_| SessionError::MalformedMessage("Invalid JSON format".to_string()))?;

    let Some(object) = value.as_object() else {
        return Err(SessionError::MalformedMessage(
            "Expected a JSON object".to_string(),
        ));
    };

    let kind = object.get("type").and_then(Value::as_str).map(str::to_string);
    if kind.as_deref() != Some("tts") {
        return Ok(ControlMessage::Ignored(kind));
    }
    serde_json::from_value(value)
        .map(ControlMessage::Tts)
        .map_err(|e| SessionError::MalformedMessage(format!("Invalid tts message: {e}")))
}

/// Structured error delivered in place of audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotification {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorNotification {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "type": "error",
            "kind": self.kind,
            "message": self.message,
        })
        .to_string()
    }
}

impl From<&SessionError> for ErrorNotification {
    fn from(error: &SessionError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Audio(AudioChunk),
    Error(ErrorNotification),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tts_message() {
        let msg = parse_control(r#"{"type":"tts","text":"hello","voice":"en-GB-RyanNeural"}"#).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Tts(TtsCommand {
                text: Some("hello".into()),
                voice: Some("en-GB-RyanNeural".into()),
                rate: None,
                volume: None,
            })
        );
    }

    #[test]
    fn test_missing_or_null_text_parses_as_none() {
        for raw in [r#"{"type":"tts"}"#, r#"{"type":"tts","text":null}"#] {
            match parse_control(raw).unwrap() {
                ControlMessage::Tts(cmd) => assert_eq!(cmd.text, None),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_types_are_ignored() {
        assert_eq!(
            parse_control(r#"{"type":"ping"}"#).unwrap(),
            ControlMessage::Ignored(Some("ping".into()))
        );
        assert_eq!(
            parse_control(r#"{"text":"no type"}"#).unwrap(),
            ControlMessage::Ignored(None)
        );
    }

    #[test]
    fn test_malformed_input() {
        let err = parse_control("not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedMessage);
        assert_eq!(err.to_string(), "Invalid JSON format");

        assert!(matches!(
            parse_control("[1,2,3]"),
            Err(SessionError::MalformedMessage(_))
        ));
        assert!(matches!(
            parse_control(r#"{"type":"tts","text":42}"#),
            Err(SessionError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = ErrorNotification::new(ErrorKind::SynthesisError, "TTS Error: boom");
        let json: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "synthesis_error");
        assert_eq!(json["message"], "TTS Error: boom");
    }
}
