//! Notification dispatch
//!
//! One round per accepted chat message: every subscription except the originator's gets
//! the payload concurrently. Rounds settle all deliveries; a failing endpoint never fails
//! the round or holds up the others beyond the per-delivery timeout.

use super::push_sender::{PushPayload, PushTransport};
use super::subscription_registry::SubscriptionRegistry;
use crate::config::PushConfig;
use crate::error::PushError;
use crate::metrics;
use crate::models::Message;
use crate::websocket::ConnectionId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Subscription kept for the next message
    TransientFailure(PushError),
    /// Endpoint is gone; its subscription is dropped
    PermanentFailure(PushError),
}

#[derive(Debug, Clone)]
pub struct PushResult {
    pub connection_id: ConnectionId,
    pub endpoint: String,
    pub outcome: DeliveryOutcome,
    /// Whether the failed subscription was dropped. A subscription replaced by the client
    /// while the round was in flight survives its old endpoint's permanent failure.
    pub removed: bool,
}

/// Aggregate outcome of a dispatch round
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub results: Vec<PushResult>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Delivered))
    }

    pub fn transient_failures(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::TransientFailure(_)))
    }

    pub fn removed(&self) -> Vec<ConnectionId> {
        self.results
            .iter()
            .filter(|r| r.removed)
            .map(|r| r.connection_id)
            .collect()
    }

    pub fn targets(&self) -> Vec<ConnectionId> {
        self.results.iter().map(|r| r.connection_id).collect()
    }

    fn count(&self, pred: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    subscriptions: SubscriptionRegistry,
    transport: Arc<dyn PushTransport>,
    relay_name: String,
    icon: String,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        subscriptions: SubscriptionRegistry,
        transport: Arc<dyn PushTransport>,
        config: &PushConfig,
    ) -> Self {
        Self {
            subscriptions,
            transport,
            relay_name: config.relay_name.clone(),
            icon: config.icon.clone(),
            timeout: config.timeout,
        }
    }

    /// Notify every subscriber other than `originator` about an accepted message.
    pub async fn notify_others(
        &self,
        originator: ConnectionId,
        message: &Message,
    ) -> DispatchReport {
        let targets = self.subscriptions.snapshot_excluding(originator).await;
        if targets.is_empty() {
            return DispatchReport::default();
        }

        let payload = Arc::new(PushPayload::for_message(
            &self.relay_name,
            &self.icon,
            &message.sender,
            &message.text,
            message.timestamp,
        ));

        let mut tasks = Vec::with_capacity(targets.len());
        for (connection_id, subscription) in targets {
            let transport = Arc::clone(&self.transport);
            let payload = Arc::clone(&payload);
            let timeout = self.timeout;
            let endpoint = subscription.endpoint.clone();
            let task = tokio::spawn(async move {
                let delivery = tokio::time::timeout(
                    timeout,
                    transport.deliver(&subscription, &payload),
                )
                .await
                .unwrap_or(Err(PushError::TimedOut(timeout)));
                (connection_id, subscription.endpoint, delivery)
            });
            tasks.push((connection_id, endpoint, task));
        }

        // Wait for all tasks to complete
        let mut report = DispatchReport::default();
        for (connection_id, endpoint, task) in tasks {
            let (connection_id, endpoint, delivery) = match task.await {
                Ok(done) => done,
                Err(e) => {
                    error!(%connection_id, error = %e, "push delivery task failed");
                    (
                        connection_id,
                        endpoint,
                        Err(PushError::Network(format!("delivery task failed: {e}"))),
                    )
                }
            };
            let (outcome, removed) = self.settle(connection_id, &endpoint, delivery).await;
            report.results.push(PushResult {
                connection_id,
                endpoint,
                outcome,
                removed,
            });
        }

        info!(
            attempted = report.attempted(),
            delivered = report.delivered(),
            transient = report.transient_failures(),
            removed = report.removed().len(),
            "notification round complete"
        );
        report
    }

    async fn settle(
        &self,
        connection_id: ConnectionId,
        endpoint: &str,
        delivery: Result<(), PushError>,
    ) -> (DeliveryOutcome, bool) {
        match delivery {
            Ok(()) => {
                metrics::record_push("delivered");
                (DeliveryOutcome::Delivered, false)
            }
            Err(e) if e.is_permanent() => {
                metrics::record_push("permanent");
                let removed = self.subscriptions.remove_if(connection_id, endpoint).await;
                if removed {
                    info!(%connection_id, %endpoint, error = %e, "push endpoint gone, subscription removed");
                } else {
                    info!(%connection_id, %endpoint, error = %e, "push endpoint gone, subscription already replaced");
                }
                (DeliveryOutcome::PermanentFailure(e), removed)
            }
            Err(e) => {
                metrics::record_push("transient");
                warn!(%connection_id, %endpoint, error = %e, "push delivery failed, subscription retained");
                (DeliveryOutcome::TransientFailure(e), false)
            }
        }
    }
}
