use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat submission as received from a client, before acceptance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub text: String,
}

impl NewMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// Name of the first required field that is empty, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.sender.trim().is_empty() {
            Some("sender")
        } else if self.text.trim().is_empty() {
            Some("text")
        } else {
            None
        }
    }
}

/// Accepted message. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub text: String,
    /// Assigned at acceptance time by the message store
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn accepted(new: NewMessage, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: new.sender,
            text: new.text,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field() {
        assert_eq!(NewMessage::new("", "hi").missing_field(), Some("sender"));
        assert_eq!(NewMessage::new("A", "   ").missing_field(), Some("text"));
        assert_eq!(NewMessage::new("A", "hi").missing_field(), None);
    }

    #[test]
    fn test_new_message_tolerates_missing_keys() {
        let parsed: NewMessage = serde_json::from_str(r#"{"sender":"A"}"#).unwrap();
        assert_eq!(parsed.text, "");
        assert_eq!(parsed.missing_field(), Some("text"));
    }

    #[test]
    fn test_message_serializes_timestamp_as_rfc3339() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let msg = Message::accepted(NewMessage::new("A", "hi"), ts);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sender"], "A");
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
    }
}
