//! Message types for the synthesis session wire protocol.
//!
//! Outbound traffic is one JSON request per play intent. Inbound traffic
//! interleaves JSON control messages (classified by their `type` tag) with
//! raw binary audio fragments; the fragments never carry JSON.

use serde::{Deserialize, Serialize};

/// Synthesis request sent to the server, one per play intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakRequest {
    /// Text to synthesize.
    pub text: String,
    /// Synthesis model identifier. The server applies its own default
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl SpeakRequest {
    /// Creates a new synthesis request.
    pub fn new(text: impl Into<String>, model: Option<String>) -> Self {
        Self {
            text: text.into(),
            model,
        }
    }
}

/// Generic message with just a type field, used for initial classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericMessage {
    /// The message type tag.
    #[serde(rename = "type")]
    pub msg_type: String,
}

/// Control message received from the server.
///
/// The tag set is closed: every text frame the session acts on carries one
/// of these four tags. Frames with any other tag are dropped by the read
/// loop as a forward-compatible no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// The peer's upstream synthesis stream is open.
    Open,
    /// The peer reported a synthesis failure.
    Error,
    /// The peer closed the synthesis stream.
    Close,
    /// No more fragments for the current request; assemble and play.
    Flushed,
}

impl ControlMessage {
    /// Maps a wire tag to its control variant.
    ///
    /// Returns `None` for unknown tags so the caller can drop them
    /// explicitly.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Open" => Some(Self::Open),
            "Error" => Some(Self::Error),
            "Close" => Some(Self::Close),
            "Flushed" => Some(Self::Flushed),
            _ => None,
        }
    }

    /// The wire tag of this variant.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Error => "Error",
            Self::Close => "Close",
            Self::Flushed => "Flushed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let req = SpeakRequest::new("hello", Some("aura-asteria-en".to_string()));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"text": "hello", "model": "aura-asteria-en"})
        );
    }

    #[test]
    fn request_omits_absent_model() {
        let req = SpeakRequest::new("hello", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, serde_json::json!({"text": "hello"}));
    }

    #[test]
    fn known_tags_classify() {
        for tag in ["Open", "Error", "Close", "Flushed"] {
            assert_eq!(ControlMessage::from_tag(tag).unwrap().tag(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_none() {
        assert_eq!(ControlMessage::from_tag("Telemetry"), None);
        assert_eq!(ControlMessage::from_tag("open"), None);
    }

    #[test]
    fn classification_tolerates_extra_fields() {
        let msg: GenericMessage =
            serde_json::from_str(r#"{"type": "Flushed", "sequence_id": 7}"#).unwrap();
        assert_eq!(
            ControlMessage::from_tag(&msg.msg_type),
            Some(ControlMessage::Flushed)
        );
    }
}
