//! Chat messages exchanged between participants as JSON text frames.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Sender name reserved for relay-generated notices.
pub const SERVER_SENDER: &str = "Server";

/// Content of the notice broadcast when a participant connects.
pub const JOIN_CONTENT: &str = "A new user has joined";

/// Content of the notice broadcast when a participant disconnects.
pub const LEFT_CONTENT: &str = "A user has left";

/// Distinguishes relay notices from user traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Join,
    Left,
    Message,
}

/// One unit of communication.
///
/// ```json
/// { "sender": "Client_1", "content": "hi", "id": "<uuid>", "iat": 1700000000000, "type": "message" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub content: String,
    pub id: String,
    /// Issued-at, milliseconds since the Unix epoch on the sender's clock.
    pub iat: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Message {
    fn fresh(sender: &str, content: &str, kind: MessageKind) -> Self {
        Self {
            sender: sender.to_string(),
            content: content.to_string(),
            id: Uuid::new_v4().to_string(),
            iat: now_millis(),
            kind,
        }
    }

    /// A user message with a fresh id stamped now.
    #[must_use]
    pub fn user(sender: &str, content: &str) -> Self {
        Self::fresh(sender, content, MessageKind::Message)
    }

    #[must_use]
    pub fn joined() -> Self {
        Self::fresh(SERVER_SENDER, JOIN_CONTENT, MessageKind::Join)
    }

    #[must_use]
    pub fn left() -> Self {
        Self::fresh(SERVER_SENDER, LEFT_CONTENT, MessageKind::Left)
    }

    /// Decode a JSON payload.
    ///
    /// # Errors
    ///
    /// `Error::MalformedPayload` if the payload is not JSON, lacks a field,
    /// has a field of the wrong type, or carries an unknown `type` tag.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Encode as a compact JSON string.
    #[must_use]
    pub fn encode(&self) -> String {
        // Every field is a string, an integer or a unit variant.
        serde_json::to_string(self).unwrap_or_default()
    }

    #[must_use]
    pub fn is_notice(&self) -> bool {
        self.kind != MessageKind::Message
    }
}
