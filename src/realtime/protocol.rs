//! JSON frames exchanged with realtime clients.
//!
//! Every frame is an object `{ "event": <name>, "data": <payload> }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(RoomRequest),
    LeaveRoom(RoomRequest),
    SendMessage(MessageRequest),
    Typing(TypingRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RoomRequest {
    #[serde(default)]
    pub room: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TypingRequest {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(rename = "isTyping", default)]
    pub is_typing: bool,
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: Value,
}

impl ServerEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// An `error` event carrying `{ "message": ... }`.
    pub fn error(message: &str) -> Self {
        Self::new("error", serde_json::json!({ "message": message }))
    }

    /// Serialize as a JSON text frame.
    pub fn to_text(&self) -> String {
        // Serializing a String and a Value cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parse a text frame from a client.
pub fn parse_client_event(text: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str(text)
}
