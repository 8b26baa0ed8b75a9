//! Conversation data model.
//!
//! Every concept the providers and the log store exchange is a closed sum
//! type so consumers are forced to handle all variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    Error,
}

/// A reference attached to a user turn: a vault note or an uploaded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    Note {
        path: String,
    },
    Image {
        name: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

/// Lifecycle of a tool invocation. Transitions pending -> terminal exactly
/// once; the orchestrator only ever appends already-resolved calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Success,
    Error,
}

/// One tool invocation requested by the model during a bot turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub processed: bool,
}

impl Message {
    /// A user turn. User turns are terminal on creation.
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            sender: Sender::User,
            content: content.into(),
            attachments,
            tool_calls: Vec::new(),
            processed: true,
        }
    }

    /// The in-flight bot turn. Exists only in memory while streaming.
    pub fn bot_placeholder() -> Self {
        Self {
            sender: Sender::Bot,
            content: String::new(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            processed: false,
        }
    }

    /// A terminal error turn recording why the bot turn failed.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::Error,
            content: content.into(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            processed: true,
        }
    }
}

/// Base64 transport for image bytes inside JSON message records.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_is_processed() {
        let msg = Message::user("hello", vec![]);
        assert!(msg.processed);
        assert_eq!(msg.sender, Sender::User);
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_placeholder_is_unprocessed_and_empty() {
        let msg = Message::bot_placeholder();
        assert!(!msg.processed);
        assert!(msg.content.is_empty());
    }

    #[test]
    fn test_image_attachment_round_trips_through_json() {
        let attachment = Attachment::Image {
            name: "sketch.png".into(),
            data: vec![0, 159, 146, 150],
        };
        let json = serde_json::to_string(&attachment).unwrap();
        let back: Attachment = serde_json::from_str(&json).unwrap();
        assert_eq!(attachment, back);
    }

    #[test]
    fn test_sender_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Sender::Bot).unwrap(), "\"bot\"");
        assert_eq!(serde_json::to_string(&Sender::Error).unwrap(), "\"error\"");
    }
}
