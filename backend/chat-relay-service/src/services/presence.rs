//! Presence tracking
//!
//! Maps each connection to the device it registered and derives the process-wide
//! online/offline state from whether any device is registered. Only the 0 <-> non-zero
//! edges are broadcast.

use crate::error::ConnectionClosed;
use crate::metrics;
use crate::websocket::{Broadcaster, ConnectionId, PresenceState, ServerEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct PresenceInner {
    devices: HashMap<ConnectionId, String>,
    state: PresenceState,
}

impl PresenceInner {
    /// Recompute the aggregate state; returns the new state on an edge.
    fn settle(&mut self) -> Option<PresenceState> {
        let next = if self.devices.is_empty() {
            PresenceState::Offline
        } else {
            PresenceState::Online
        };
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Mutex<PresenceInner>>,
    broadcaster: Broadcaster,
}

impl PresenceTracker {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PresenceInner {
                devices: HashMap::new(),
                state: PresenceState::Offline,
            })),
            broadcaster,
        }
    }

    /// Insert or overwrite the device for a connection.
    ///
    /// Returns the new aggregate state if this registration flipped it online. A connection
    /// that is no longer live is rejected; the liveness check and the insert share the lock
    /// with `unregister`, so a registration racing a disconnect never outlives it.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        device_id: impl Into<String>,
    ) -> Result<Option<PresenceState>, ConnectionClosed> {
        let device_id = device_id.into();
        let mut guard = self.inner.lock().await;
        if !self.broadcaster.registry().is_connected(connection_id).await {
            tracing::debug!(%connection_id, %device_id, "registration for closed connection ignored");
            return Err(ConnectionClosed(connection_id));
        }
        if let Some(previous) = guard.devices.insert(connection_id, device_id.clone()) {
            tracing::debug!(%connection_id, %previous, %device_id, "device re-registered");
        } else {
            tracing::debug!(%connection_id, %device_id, "device registered");
        }
        let edge = guard.settle();
        // The edge is emitted under the lock so concurrent flips are observed in order.
        if let Some(state) = edge {
            self.emit(state).await;
        }
        Ok(edge)
    }

    /// Remove the connection's device, if any.
    ///
    /// Returns the new aggregate state if this removal flipped it offline.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<PresenceState> {
        let mut guard = self.inner.lock().await;
        if let Some(device_id) = guard.devices.remove(&connection_id) {
            tracing::debug!(%connection_id, %device_id, "device unregistered");
        }
        let edge = guard.settle();
        if let Some(state) = edge {
            self.emit(state).await;
        }
        edge
    }

    pub async fn snapshot_size(&self) -> usize {
        self.inner.lock().await.devices.len()
    }

    pub async fn state(&self) -> PresenceState {
        self.inner.lock().await.state
    }

    pub async fn device_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.inner.lock().await.devices.get(&connection_id).cloned()
    }

    async fn emit(&self, state: PresenceState) {
        metrics::set_presence(state);
        let reached = self
            .broadcaster
            .broadcast_all(&ServerEvent::UserStatus { status: state })
            .await;
        tracing::info!(status = state.as_str(), sessions = reached, "presence changed");
    }
}
