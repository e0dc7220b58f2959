//! # Chat Relay
//!
//! Wires the relay core together and implements the per-event handlers:
//!
//! - `registerDevice`: presence register, then history replay to the caller
//! - `unregisterDevice`: presence unregister
//! - `pushSubscription`: store the caller's push endpoint
//! - `chatMessage`: sanitize, persist, broadcast, notify (strictly in that order)
//! - disconnect: drop device, subscription and session together
//!
//! Handlers for different connections run concurrently; all cross-connection state lives
//! behind the presence tracker and the subscription registry.

use super::message_store::{into_chronological, MessageStore, ScanOrder};
use super::notification_dispatcher::{DispatchReport, NotificationDispatcher};
use super::presence::PresenceTracker;
use super::push_sender::PushTransport;
use super::sanitizer::Sanitizer;
use super::subscription_registry::SubscriptionRegistry;
use crate::config::PushConfig;
use crate::error::{ConnectionClosed, RelayError};
use crate::metrics;
use crate::models::{Message, NewMessage, PushSubscription};
use crate::websocket::{
    Broadcaster, ClientEvent, ConnectionId, ConnectionRegistry, PresenceState, ServerEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// Result of an accepted chat submission
#[derive(Debug, Clone)]
pub struct Accepted {
    pub message: Message,
    /// Sessions the `message` event reached
    pub broadcast_to: usize,
    pub notifications: DispatchReport,
}

#[derive(Clone)]
pub struct ChatRelay {
    sessions: ConnectionRegistry,
    broadcaster: Broadcaster,
    presence: PresenceTracker,
    subscriptions: SubscriptionRegistry,
    dispatcher: NotificationDispatcher,
    store: Arc<dyn MessageStore>,
    sanitizer: Arc<dyn Sanitizer>,
    history_limit: usize,
}

impl ChatRelay {
    pub fn new(
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn PushTransport>,
        sanitizer: Arc<dyn Sanitizer>,
        push: &PushConfig,
        history_limit: usize,
    ) -> Self {
        let sessions = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(sessions.clone());
        let presence = PresenceTracker::new(broadcaster.clone());
        let subscriptions = SubscriptionRegistry::new(sessions.clone());
        let dispatcher = NotificationDispatcher::new(subscriptions.clone(), transport, push);

        Self {
            sessions,
            broadcaster,
            presence,
            subscriptions,
            dispatcher,
            store,
            sanitizer,
            history_limit,
        }
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn sessions(&self) -> &ConnectionRegistry {
        &self.sessions
    }

    /// Admit a new session. Frames for it arrive on the returned receiver.
    pub async fn connect(&self) -> (ConnectionId, UnboundedReceiver<String>) {
        let (connection_id, rx) = self.sessions.connect().await;
        metrics::set_connections(self.sessions.connection_count().await);
        info!(%connection_id, "client connected");
        (connection_id, rx)
    }

    /// Tear down every piece of state held for the connection.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        // Session first so the offline edge is not delivered to the departing client.
        self.sessions.disconnect(connection_id).await;
        self.subscriptions.remove(connection_id).await;
        self.presence.unregister(connection_id).await;
        metrics::set_connections(self.sessions.connection_count().await);
        info!(%connection_id, "client disconnected");
    }

    /// Dispatch one inbound event from `connection_id`.
    ///
    /// Events from one connection must be handled in arrival order, and before its
    /// disconnect; the session transport runs them through a single worker.
    pub async fn handle_event(&self, connection_id: ConnectionId, event: ClientEvent) {
        let name = event.name();
        debug!(%connection_id, event = name, "inbound event");
        let closed = match event {
            ClientEvent::RegisterDevice { device_id } => self
                .register_device(connection_id, device_id)
                .await
                .err(),
            ClientEvent::UnregisterDevice { device_id } => {
                self.unregister_device(connection_id, &device_id).await;
                None
            }
            ClientEvent::PushSubscription { subscription } => {
                self.subscribe_push(connection_id, subscription).await.err()
            }
            ClientEvent::ChatMessage(message) => {
                match self.submit_chat(connection_id, message).await {
                    Ok(accepted) => debug!(
                        %connection_id,
                        broadcast_to = accepted.broadcast_to,
                        notified = accepted.notifications.delivered(),
                        "chat message relayed"
                    ),
                    // Already reported to the originator
                    Err(e) => debug!(%connection_id, error = %e, "chat message not relayed"),
                }
                None
            }
        };
        if let Some(e) = closed {
            debug!(event = name, error = %e, "event dropped");
        }
    }

    /// Record the connection's device and replay recent history to it.
    pub async fn register_device(
        &self,
        connection_id: ConnectionId,
        device_id: String,
    ) -> Result<Option<PresenceState>, ConnectionClosed> {
        let edge = self.presence.register(connection_id, device_id).await?;

        match self.recent_history(self.history_limit).await {
            Ok(history) => {
                self.broadcaster.replay_to(connection_id, history).await;
            }
            Err(e) => {
                error!(%connection_id, error = %e, "failed to load history for replay");
                self.broadcaster
                    .send_to(connection_id, &ServerEvent::Error(e.client_message()))
                    .await;
            }
        }
        Ok(edge)
    }

    pub async fn unregister_device(
        &self,
        connection_id: ConnectionId,
        device_id: &str,
    ) -> Option<PresenceState> {
        if let Some(known) = self.presence.device_of(connection_id).await {
            if !device_id.is_empty() && known != device_id {
                debug!(%connection_id, %known, requested = %device_id, "unregistering mismatched device id");
            }
        }
        self.presence.unregister(connection_id).await
    }

    pub async fn subscribe_push(
        &self,
        connection_id: ConnectionId,
        subscription: PushSubscription,
    ) -> Result<(), ConnectionClosed> {
        self.subscriptions.put(connection_id, subscription).await
    }

    /// Accept a chat message from `connection_id`.
    ///
    /// Persistence strictly precedes the broadcast, which strictly precedes notification
    /// dispatch. On failure only the originator hears about it.
    pub async fn submit_chat(
        &self,
        connection_id: ConnectionId,
        submission: NewMessage,
    ) -> Result<Accepted, RelayError> {
        let message = match self.accept(submission).await {
            Ok(message) => message,
            Err(e) => {
                match &e {
                    RelayError::ValidationFailed(detail) => {
                        metrics::record_rejected("validation");
                        warn!(%connection_id, error = %detail, "rejected chat message");
                    }
                    RelayError::StoreUnavailable(detail) => {
                        metrics::record_rejected("store_unavailable");
                        error!(%connection_id, error = %detail, "failed to persist message");
                    }
                }
                self.broadcaster
                    .send_to(connection_id, &ServerEvent::Error(e.client_message()))
                    .await;
                return Err(e);
            }
        };
        metrics::record_accepted();

        let broadcast_to = self
            .broadcaster
            .broadcast_all(&ServerEvent::Message(message.clone()))
            .await;

        let notifications = self
            .dispatcher
            .notify_others(connection_id, &message)
            .await;

        Ok(Accepted {
            message,
            broadcast_to,
            notifications,
        })
    }

    async fn accept(&self, submission: NewMessage) -> Result<Message, RelayError> {
        let clean = NewMessage {
            sender: self.sanitizer.sanitize(&submission.sender),
            text: self.sanitizer.sanitize(&submission.text),
        };
        if let Some(field) = clean.missing_field() {
            return Err(RelayError::ValidationFailed(format!("{field} is required")));
        }
        Ok(self.store.append(clean).await?)
    }

    /// The most recent `limit` messages, oldest first.
    pub async fn recent_history(&self, limit: usize) -> Result<Vec<Message>, RelayError> {
        let newest_first = self.store.read_recent(limit, ScanOrder::Descending).await?;
        Ok(into_chronological(newest_first))
    }
}
