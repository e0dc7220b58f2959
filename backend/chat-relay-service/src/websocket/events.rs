//! Wire events exchanged over a relay session.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.

use crate::models::{Message, NewMessage, PushSubscription};
use serde::{Deserialize, Serialize};

/// Aggregate presence: online while at least one device is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Online => "online",
            PresenceState::Offline => "offline",
        }
    }
}

/// Inbound events from client to relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    RegisterDevice {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    UnregisterDevice {
        #[serde(rename = "deviceId", default)]
        device_id: String,
    },
    PushSubscription { subscription: PushSubscription },
    ChatMessage(NewMessage),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RegisterDevice { .. } => "registerDevice",
            ClientEvent::UnregisterDevice { .. } => "unregisterDevice",
            ClientEvent::PushSubscription { .. } => "pushSubscription",
            ClientEvent::ChatMessage(_) => "chatMessage",
        }
    }
}

/// Outbound events from relay to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// History replay, ascending by timestamp. Unicast once on registration.
    PreviousMessages(Vec<Message>),
    Message(Message),
    UserStatus { status: PresenceState },
    Error(String),
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
