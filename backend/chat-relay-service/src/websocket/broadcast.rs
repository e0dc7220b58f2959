use super::{ConnectionId, ConnectionRegistry, ServerEvent};
use crate::models::Message;

/// Fan-out of relay events to live sessions
///
/// Delivery is a multicast: every session present at the instant of the call gets the
/// frame once, in no particular order across sessions. Sessions that are already gone
/// are skipped silently.
#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Deliver an event to every connected session, the sender included.
    pub async fn broadcast_all(&self, event: &ServerEvent) -> usize {
        let frame = match event.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize broadcast event");
                return 0;
            }
        };
        self.registry.send_all(&frame).await
    }

    /// Unicast an event to a single session.
    pub async fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        match event.to_json() {
            Ok(frame) => self.registry.send_to(connection_id, frame).await,
            Err(e) => {
                tracing::error!(error = %e, %connection_id, "failed to serialize event");
                false
            }
        }
    }

    /// Deliver the whole history to one session as a single `previousMessages` event.
    pub async fn replay_to(&self, connection_id: ConnectionId, messages: Vec<Message>) -> bool {
        let count = messages.len();
        let delivered = self
            .send_to(connection_id, &ServerEvent::PreviousMessages(messages))
            .await;
        tracing::debug!(%connection_id, count, delivered, "history replayed");
        delivered
    }
}
