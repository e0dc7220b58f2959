use crate::error::ConnectionClosed;
use crate::models::PushSubscription;
use crate::websocket::{ConnectionId, ConnectionRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Push endpoints keyed by the connection that registered them
///
/// At most one subscription per connection; a later `put` overwrites.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, PushSubscription>>>,
    sessions: ConnectionRegistry,
}

impl SubscriptionRegistry {
    pub fn new(sessions: ConnectionRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            sessions,
        }
    }

    /// Store the connection's subscription.
    ///
    /// Liveness is checked under the write lock, which disconnect also takes to remove the
    /// entry, so a subscription can never be stored for a connection that already left.
    pub async fn put(
        &self,
        connection_id: ConnectionId,
        subscription: PushSubscription,
    ) -> Result<(), ConnectionClosed> {
        let mut guard = self.inner.write().await;
        if !self.sessions.is_connected(connection_id).await {
            tracing::debug!(%connection_id, "push subscription for closed connection ignored");
            return Err(ConnectionClosed(connection_id));
        }
        let replaced = guard.insert(connection_id, subscription).is_some();
        tracing::debug!(
            %connection_id,
            replaced,
            total = guard.len(),
            "push subscription stored"
        );
        Ok(())
    }

    /// Remove the connection's subscription. Returns whether one existed.
    pub async fn remove(&self, connection_id: ConnectionId) -> bool {
        self.inner.write().await.remove(&connection_id).is_some()
    }

    /// Remove the connection's subscription only if it still points at `endpoint`.
    ///
    /// A subscription replaced since `endpoint` was read is left alone.
    pub async fn remove_if(&self, connection_id: ConnectionId, endpoint: &str) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get(&connection_id) {
            Some(current) if current.endpoint == endpoint => {
                guard.remove(&connection_id);
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy of every subscription except `excluded`'s.
    ///
    /// Later puts/removes do not affect the returned vector.
    pub async fn snapshot_excluding(
        &self,
        excluded: ConnectionId,
    ) -> Vec<(ConnectionId, PushSubscription)> {
        let guard = self.inner.read().await;
        guard
            .iter()
            .filter(|(id, _)| **id != excluded)
            .map(|(id, sub)| (*id, sub.clone()))
            .collect()
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<PushSubscription> {
        self.inner.read().await.get(&connection_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
