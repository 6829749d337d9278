//! Client protocol for WebSocket push frames sent from the relay to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed chat text broadcast when a relay attempt fails or times out.
pub const FALLBACK_TEXT: &str =
    "Sorry, I encountered an error processing your request. Please try again.";

/// A reply destined for every live connection.
///
/// Built either from the processor's synchronous answer, from a failed relay
/// attempt, or from an out-of-band callback. Consumed once by the broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: Option<String>,
    pub audio: Option<String>,
    pub error: bool,
    pub timestamp: DateTime<Utc>,
}

impl ReplyPayload {
    pub fn success(text: Option<String>, audio: Option<String>) -> Self {
        Self {
            text,
            audio,
            error: false,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            audio: None,
            error: true,
            timestamp: Utc::now(),
        }
    }

    /// The generic error payload shown in chat after a failed relay.
    pub fn fallback() -> Self {
        Self::failure(FALLBACK_TEXT)
    }
}

/// Relay → Client event frame (server push)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEvent {
    #[serde(rename = "type")]
    pub frame_type: String, // Always "event"
    pub event: String,
    pub data: Value,
}

/// Event names for server push
pub mod events {
    pub const CONNECTED: &str = "connected";
    pub const AI_RESPONSE: &str = "ai_response";
}

impl ClientEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            frame_type: "event".to_string(),
            event: event.to_string(),
            data,
        }
    }

    /// Greeting sent to a connection right after it is registered.
    pub fn connected(connection_id: &str) -> Self {
        Self::new(
            events::CONNECTED,
            serde_json::json!({ "connection_id": connection_id }),
        )
    }

    pub fn ai_response(payload: &ReplyPayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(events::AI_RESPONSE, serde_json::to_value(payload)?))
    }
}
