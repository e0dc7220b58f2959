/// Push Notification Sender
///
/// Builds the notification payload for a chat message and delivers it to a single
/// subscriber endpoint. Delivery failures are classified so the dispatcher can drop
/// endpoints that are gone (404/410) and keep the rest for the next message.
use crate::error::PushError;
use crate::models::PushSubscription;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Characters of message text kept in a notification body
pub const PREVIEW_CHARS: usize = 100;
const ELLIPSIS: &str = "...";

/// Notification payload posted to a push endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    /// ISO-8601
    pub timestamp: String,
}

impl PushPayload {
    pub fn for_message(
        relay_name: &str,
        icon: &str,
        sender: &str,
        text: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: format!("New Message in {relay_name}"),
            body: format!("{sender}: {}", preview(text)),
            icon: icon.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Longest character reference kept whole, e.g. `&#x2F;`
const MAX_ENTITY_LEN: usize = 10;

/// First [`PREVIEW_CHARS`] characters of `text`, with a trailing marker if anything was cut.
///
/// Text arrives HTML-escaped, so a character reference such as `&amp;` counts as one
/// character and is never split.
pub fn preview(text: &str) -> String {
    let mut cut = 0;
    for _ in 0..PREVIEW_CHARS {
        if cut == text.len() {
            return text.to_string();
        }
        cut += unit_len(&text[cut..]);
    }
    if cut == text.len() {
        text.to_string()
    } else {
        format!("{}{ELLIPSIS}", &text[..cut])
    }
}

/// Byte length of the leading display character of `rest`.
fn unit_len(rest: &str) -> usize {
    if rest.starts_with('&') {
        let reference = rest[1..]
            .char_indices()
            .take(MAX_ENTITY_LEN)
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '#'));
        if let Some((end, ';')) = reference {
            if end > 0 {
                return end + 2;
            }
        }
    }
    rest.chars().next().map_or(0, char::len_utf8)
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError>;
}

/// Posts the JSON payload to the subscription endpoint over HTTP
#[derive(Clone)]
pub struct HttpPushTransport {
    http_client: reqwest::Client,
    ttl_seconds: u32,
}

impl HttpPushTransport {
    pub fn new(timeout: Duration, ttl_seconds: u32) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            ttl_seconds,
        })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        let url = reqwest::Url::parse(&subscription.endpoint)
            .map_err(|e| PushError::InvalidEndpoint(format!("{}: {e}", subscription.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PushError::InvalidEndpoint(subscription.endpoint.clone()));
        }

        let response = self
            .http_client
            .post(url)
            .header("TTL", self.ttl_seconds.to_string())
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(endpoint = %subscription.endpoint, status = status.as_u16(), "push delivered");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(PushError::from_status(status.as_u16(), body))
    }
}
