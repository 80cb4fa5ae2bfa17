//! WebSocket message types: envelope and commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Client-provided ID for requests; server-generated for events.
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp.
    pub timestamp: DateTime<Utc>,
    /// Variant-specific payload.
    pub payload: serde_json::Value,
}

impl WsMessage {
    /// Builds a server message stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, msg_type: WsMessageType, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            msg_type,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Error message with a numeric code.
    #[must_use]
    pub fn error(id: impl Into<String>, code: u16, message: &str) -> Self {
        Self::new(
            id,
            WsMessageType::Error,
            serde_json::json!({ "code": code, "message": message }),
        )
    }
}

/// Discriminator for WebSocket message types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Client → Server command.
    Command,
    /// Server → Client response to a command.
    Response,
    /// Server → Client forwarded event.
    Event,
    /// Server → Client error.
    Error,
}

/// Commands carried in the payload of a [`WsMessageType::Command`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WsCommand {
    /// Add users to the event filter. `["*"]` selects every user.
    Subscribe {
        /// User ids as strings.
        user_ids: Vec<String>,
    },
    /// Remove users from the event filter.
    Unsubscribe {
        /// User ids as strings.
        user_ids: Vec<String>,
    },
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_command_parses() {
        let payload = serde_json::json!({ "command": "subscribe", "user_ids": ["*"] });
        let Ok(WsCommand::Subscribe { user_ids }) = serde_json::from_value::<WsCommand>(payload) else {
            panic!("expected subscribe");
        };
        assert_eq!(user_ids, vec!["*".to_string()]);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let payload = serde_json::json!({ "command": "transfer", "user_ids": [] });
        assert!(serde_json::from_value::<WsCommand>(payload).is_err());
    }

    #[test]
    fn envelope_uses_type_key() {
        let msg = WsMessage::error("1", 403, "forbidden");
        let Ok(value) = serde_json::to_value(&msg) else {
            panic!("serialize failed");
        };
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], 403);
    }
}
