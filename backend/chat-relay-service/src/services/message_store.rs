//! # Message Store
//!
//! Append-and-return plus bounded-range read over the message log. The relay core only
//! depends on the [`MessageStore`] trait; PostgreSQL and in-memory backends are provided.

use crate::error::StoreError;
use crate::models::{Message, NewMessage};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Scan direction over the timestamp index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Ascending,
    Descending,
}

impl ScanOrder {
    fn sql(&self) -> &'static str {
        match self {
            ScanOrder::Ascending => "ASC",
            ScanOrder::Descending => "DESC",
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message; the returned copy carries the acceptance timestamp.
    async fn append(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Read at most `limit` messages scanning in `order`.
    ///
    /// With `Descending` this is the most recent `limit` messages, newest first.
    async fn read_recent(&self, limit: usize, order: ScanOrder)
        -> Result<Vec<Message>, StoreError>;
}

fn validate(message: &NewMessage) -> Result<(), StoreError> {
    match message.missing_field() {
        Some(field) => Err(StoreError::Validation(format!("{field} is required"))),
        None => Ok(()),
    }
}

/// Sort a history window chronologically for replay.
///
/// The sort is stable, so messages sharing a timestamp keep their scan order.
pub fn into_chronological(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(|m| m.timestamp);
    messages
}

/// PostgreSQL-backed store over the `messages` table
#[derive(Clone)]
pub struct PgMessageStore {
    db: Pool,
}

impl PgMessageStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: NewMessage) -> Result<Message, StoreError> {
        validate(&message)?;

        let client = self.db.get().await?;
        let row = client
            .query_one(
                "INSERT INTO messages (sender, text) VALUES ($1, $2) \
                 RETURNING sender, text, timestamp",
                &[&message.sender, &message.text],
            )
            .await?;

        Ok(Message {
            sender: row.get(0),
            text: row.get(1),
            timestamp: row.get(2),
        })
    }

    async fn read_recent(
        &self,
        limit: usize,
        order: ScanOrder,
    ) -> Result<Vec<Message>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let client = self.db.get().await?;
        let query = format!(
            "SELECT sender, text, timestamp FROM messages ORDER BY timestamp {} LIMIT $1",
            order.sql()
        );
        let rows = client.query(query.as_str(), &[&limit]).await?;

        Ok(rows
            .iter()
            .map(|row| Message {
                sender: row.get(0),
                text: row.get(1),
                timestamp: row.get(2),
            })
            .collect())
    }
}

/// Process-local store; history is lost on restart
#[derive(Default, Clone)]
pub struct InMemoryMessageStore {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with already-accepted messages, in the given insertion order.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(RwLock::new(messages)),
        }
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: NewMessage) -> Result<Message, StoreError> {
        validate(&message)?;
        let mut guard = self.messages.write().await;
        // Stamped under the lock so insertion order follows timestamp order.
        let accepted = Message::accepted(message, Utc::now());
        guard.push(accepted.clone());
        Ok(accepted)
    }

    /// Selects the window by timestamp, whatever order messages were inserted in.
    async fn read_recent(
        &self,
        limit: usize,
        order: ScanOrder,
    ) -> Result<Vec<Message>, StoreError> {
        let mut scan = self.messages.read().await.clone();
        match order {
            ScanOrder::Ascending => scan.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
            ScanOrder::Descending => scan.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        }
        scan.truncate(limit);
        Ok(scan)
    }
}
