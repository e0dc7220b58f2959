use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod broadcast;
pub mod events;

pub use broadcast::Broadcaster;
pub use events::{ClientEvent, PresenceState, ServerEvent};

/// Opaque identity of a live connection
///
/// Assigned when the transport accepts a client and dropped at disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Live sessions keyed by connection identity
///
/// Each session owns the receiving half of an unbounded channel; the registry keeps
/// the sender. Serialized frames pushed here are written to the socket by the session.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, UnboundedSender<String>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identity for a new session.
    ///
    /// Returns the connection id and the receiver the session drains.
    pub async fn connect(&self) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let connection_id = ConnectionId::new();

        let mut guard = self.inner.write().await;
        guard.insert(connection_id, tx);

        tracing::debug!(
            connection_id = %connection_id,
            total = guard.len(),
            "session connected"
        );

        (connection_id, rx)
    }

    /// Drop the session's sender. Its receiver then yields `None`.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        let removed = guard.remove(&connection_id).is_some();
        if removed {
            tracing::debug!(
                connection_id = %connection_id,
                remaining = guard.len(),
                "session removed from registry"
            );
        }
        removed
    }

    /// Send a frame to one session. Returns false if the session is gone.
    pub async fn send_to(&self, connection_id: ConnectionId, frame: String) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(&connection_id)
            .map(|sender| sender.send(frame).is_ok())
            .unwrap_or(false)
    }

    /// Send a frame to every live session. Returns how many sessions accepted it.
    ///
    /// Senders whose receiver has been dropped are cleaned up.
    pub async fn send_all(&self, frame: &str) -> usize {
        let mut guard = self.inner.write().await;
        let before = guard.len();

        guard.retain(|_, sender| sender.send(frame.to_string()).is_ok());

        let after = guard.len();
        if before != after {
            crate::metrics::set_connections(after);
            tracing::debug!(
                "broadcast: {} dead senders cleaned up, {} active",
                before - after,
                after
            );
        }
        after
    }

    pub async fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.inner.read().await.contains_key(&connection_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.len()
    }
}
