/// End-to-end tests for the relay core
///
/// Drives `ChatRelay` through channel-backed sessions, the in-memory message store and
/// a recording push transport. Covers:
/// - presence edges across several connections
/// - chat flow ordering (persist -> broadcast -> notify)
/// - history replay order
/// - failure containment for persistence and push delivery
use async_trait::async_trait;
use chat_relay_service::config::PushConfig;
use chat_relay_service::error::{PushError, StoreError};
use chat_relay_service::models::{Message, NewMessage, PushSubscription};
use chat_relay_service::services::{
    ChatRelay, HtmlEscaper, InMemoryMessageStore, MessageStore, PushPayload, PushTransport,
    ScanOrder,
};
use chat_relay_service::websocket::{ClientEvent, ConnectionId, PresenceState, ServerEvent};
use chat_relay_service::RelayError;
use chrono::{SecondsFormat, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;

#[derive(Default)]
struct RecordingTransport {
    gone: HashSet<String>,
    flaky: HashSet<String>,
    delivered: Mutex<Vec<(String, PushPayload)>>,
    /// Store length observed at each delivery
    store_len_at_delivery: Mutex<Vec<usize>>,
    store: Option<InMemoryMessageStore>,
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        if let Some(store) = &self.store {
            self.store_len_at_delivery.lock().await.push(store.len().await);
        }
        self.delivered
            .lock()
            .await
            .push((subscription.endpoint.clone(), payload.clone()));
        if self.gone.contains(&subscription.endpoint) {
            return Err(PushError::Gone { status: 410 });
        }
        if self.flaky.contains(&subscription.endpoint) {
            return Err(PushError::Network("connection reset".into()));
        }
        Ok(())
    }
}

struct UnavailableStore;

#[async_trait]
impl MessageStore for UnavailableStore {
    async fn append(&self, _message: NewMessage) -> Result<Message, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn read_recent(
        &self,
        _limit: usize,
        _order: ScanOrder,
    ) -> Result<Vec<Message>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

fn push_config() -> PushConfig {
    PushConfig {
        relay_name: "Lobby".into(),
        icon: "/icon.png".into(),
        timeout: Duration::from_secs(5),
        ttl_seconds: 60,
    }
}

fn relay_with(store: Arc<dyn MessageStore>, transport: Arc<RecordingTransport>) -> ChatRelay {
    ChatRelay::new(store, transport, Arc::new(HtmlEscaper), &push_config(), 50)
}

/// Everything queued for a session so far
fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        events.push(ServerEvent::from_json(&frame).expect("valid frame"));
    }
    events
}

fn status_events(events: &[ServerEvent]) -> Vec<PresenceState> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::UserStatus { status } => Some(*status),
            _ => None,
        })
        .collect()
}

fn chat_events(events: &[ServerEvent]) -> Vec<&Message> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Message(m) => Some(m),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_two_registrations_produce_one_online_broadcast() {
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay_with(Arc::new(InMemoryMessageStore::new()), transport);
    let (a, mut rx_a) = relay.connect().await;
    let (b, mut rx_b) = relay.connect().await;

    relay
        .handle_event(a, ClientEvent::RegisterDevice { device_id: "d1".into() })
        .await;
    relay
        .handle_event(b, ClientEvent::RegisterDevice { device_id: "d2".into() })
        .await;

    let events_a = drain(&mut rx_a);
    let events_b = drain(&mut rx_b);
    assert_eq!(status_events(&events_a), vec![PresenceState::Online]);
    assert_eq!(status_events(&events_b), vec![PresenceState::Online]);

    // Each registrant gets exactly one replay
    for events in [&events_a, &events_b] {
        let replays = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::PreviousMessages(_)))
            .count();
        assert_eq!(replays, 1);
    }
    assert_eq!(relay.presence().state().await, PresenceState::Online);
}

#[tokio::test]
async fn test_chat_broadcasts_to_all_and_notifies_others_only() {
    let store = InMemoryMessageStore::new();
    let transport = Arc::new(RecordingTransport {
        store: Some(store.clone()),
        ..Default::default()
    });
    let relay = relay_with(Arc::new(store.clone()), transport.clone());
    let (a, mut rx_a) = relay.connect().await;
    let (b, mut rx_b) = relay.connect().await;

    relay.register_device(a, "d1".into()).await.unwrap();
    relay.register_device(b, "d2".into()).await.unwrap();
    relay
        .handle_event(
            a,
            ClientEvent::PushSubscription {
                subscription: PushSubscription::new("https://push.example.com/a"),
            },
        )
        .await;
    relay
        .handle_event(
            b,
            ClientEvent::PushSubscription {
                subscription: PushSubscription::new("https://push.example.com/b"),
            },
        )
        .await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    let accepted = relay
        .submit_chat(a, NewMessage::new("A", "hi"))
        .await
        .expect("accepted");

    assert_eq!(accepted.broadcast_to, 2);
    assert_eq!(accepted.notifications.targets(), vec![b]);
    assert_eq!(store.len().await, 1);

    for rx in [&mut rx_a, &mut rx_b] {
        let events = drain(rx);
        let chats = chat_events(&events);
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].sender, "A");
        assert_eq!(chats[0].text, "hi");
        assert_eq!(chats[0], &accepted.message);
    }

    let delivered = transport.delivered.lock().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "https://push.example.com/b");
    assert_eq!(delivered[0].1.body, "A: hi");
    assert_eq!(delivered[0].1.title, "New Message in Lobby");
    assert_eq!(delivered[0].1.icon, "/icon.png");
    assert_eq!(
        delivered[0].1.timestamp,
        accepted
            .message
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    );

    // Persisted before any push went out
    assert_eq!(*transport.store_len_at_delivery.lock().await, vec![1]);
}

#[tokio::test]
async fn test_departure_with_others_present_keeps_presence() {
    let relay = relay_with(
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(RecordingTransport::default()),
    );
    let (a, _rx_a) = relay.connect().await;
    let (b, mut rx_b) = relay.connect().await;
    relay.register_device(a, "d1".into()).await.unwrap();
    relay.register_device(b, "d2".into()).await.unwrap();
    drain(&mut rx_b);

    relay.disconnect(a).await;
    assert!(status_events(&drain(&mut rx_b)).is_empty());
    assert_eq!(relay.presence().state().await, PresenceState::Online);
    assert_eq!(relay.presence().snapshot_size().await, 1);

    relay.disconnect(b).await;
    assert_eq!(relay.presence().state().await, PresenceState::Offline);
    assert_eq!(relay.sessions().connection_count().await, 0);
}

#[tokio::test]
async fn test_unregister_device_flips_offline_for_remaining_sessions() {
    let relay = relay_with(
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(RecordingTransport::default()),
    );
    let (a, mut rx_a) = relay.connect().await;
    let (_watcher, mut rx_w) = relay.connect().await;
    relay.register_device(a, "d1".into()).await.unwrap();
    drain(&mut rx_a);
    drain(&mut rx_w);

    relay
        .handle_event(a, ClientEvent::UnregisterDevice { device_id: "d1".into() })
        .await;
    assert_eq!(status_events(&drain(&mut rx_w)), vec![PresenceState::Offline]);
    assert_eq!(status_events(&drain(&mut rx_a)), vec![PresenceState::Offline]);
}

#[tokio::test]
async fn test_disconnect_drops_subscription() {
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay_with(Arc::new(InMemoryMessageStore::new()), transport.clone());
    let (a, _rx_a) = relay.connect().await;
    let (b, _rx_b) = relay.connect().await;
    relay
        .subscribe_push(b, PushSubscription::new("https://push.example.com/b"))
        .await
        .unwrap();

    relay.disconnect(b).await;
    assert!(relay.subscriptions().get(b).await.is_none());

    let accepted = relay.submit_chat(a, NewMessage::new("A", "hi")).await.unwrap();
    assert_eq!(accepted.notifications.attempted(), 0);
    assert!(transport.delivered.lock().await.is_empty());
}

#[tokio::test]
async fn test_replay_is_chronological_regardless_of_scan_order() {
    let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();
    let stored = vec![
        Message {
            sender: "A".into(),
            text: "three".into(),
            timestamp: at(3),
        },
        Message {
            sender: "A".into(),
            text: "one".into(),
            timestamp: at(1),
        },
        Message {
            sender: "A".into(),
            text: "two".into(),
            timestamp: at(2),
        },
    ];
    let relay = relay_with(
        Arc::new(InMemoryMessageStore::with_messages(stored)),
        Arc::new(RecordingTransport::default()),
    );
    let (a, mut rx_a) = relay.connect().await;
    relay.register_device(a, "d1".into()).await.unwrap();

    let replay = drain(&mut rx_a)
        .into_iter()
        .find_map(|e| match e {
            ServerEvent::PreviousMessages(messages) => Some(messages),
            _ => None,
        })
        .expect("replay sent");
    let secs: Vec<i64> = replay.iter().map(|m| m.timestamp.timestamp()).collect();
    assert_eq!(secs, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_store_unavailable_reports_to_originator_only() {
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay_with(Arc::new(UnavailableStore), transport.clone());
    let (a, mut rx_a) = relay.connect().await;
    let (b, mut rx_b) = relay.connect().await;
    relay
        .subscribe_push(b, PushSubscription::new("https://push.example.com/b"))
        .await
        .unwrap();

    let err = relay
        .submit_chat(a, NewMessage::new("A", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::StoreUnavailable(_)));

    assert_eq!(
        drain(&mut rx_a),
        vec![ServerEvent::Error("Failed to save message".into())]
    );
    assert!(drain(&mut rx_b).is_empty());
    assert!(transport.delivered.lock().await.is_empty());
    assert!(relay.subscriptions().get(b).await.is_some());
    assert_eq!(relay.subscriptions().len().await, 1);
}

#[tokio::test]
async fn test_missing_text_is_rejected_before_persistence() {
    let store = InMemoryMessageStore::new();
    let relay = relay_with(
        Arc::new(store.clone()),
        Arc::new(RecordingTransport::default()),
    );
    let (a, mut rx_a) = relay.connect().await;
    let (_b, mut rx_b) = relay.connect().await;

    relay
        .handle_event(a, ClientEvent::ChatMessage(NewMessage::new("A", "   ")))
        .await;

    let events = drain(&mut rx_a);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ServerEvent::Error(msg) if msg.contains("text")));
    assert!(drain(&mut rx_b).is_empty());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_message_text_is_sanitized_before_broadcast() {
    let relay = relay_with(
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(RecordingTransport::default()),
    );
    let (a, mut rx_a) = relay.connect().await;

    relay
        .submit_chat(a, NewMessage::new("A", "<b>hi</b>"))
        .await
        .unwrap();
    let events = drain(&mut rx_a);
    assert_eq!(chat_events(&events)[0].text, "&lt;b&gt;hi&lt;&#x2F;b&gt;");
}

#[tokio::test]
async fn test_notification_body_truncation_boundary() {
    let transport = Arc::new(RecordingTransport::default());
    let relay = relay_with(Arc::new(InMemoryMessageStore::new()), transport.clone());
    let (a, _rx_a) = relay.connect().await;
    let (b, _rx_b) = relay.connect().await;
    relay
        .subscribe_push(b, PushSubscription::new("https://push.example.com/b"))
        .await
        .unwrap();

    let long = "a".repeat(101);
    let exact = "b".repeat(100);
    relay.submit_chat(a, NewMessage::new("A", long)).await.unwrap();
    relay.submit_chat(a, NewMessage::new("A", exact.clone())).await.unwrap();

    let delivered = transport.delivered.lock().await;
    assert_eq!(delivered[0].1.body, format!("A: {}...", "a".repeat(100)));
    assert_eq!(delivered[1].1.body, format!("A: {exact}"));
}

#[tokio::test]
async fn test_push_failures_are_contained() {
    let transport = Arc::new(RecordingTransport {
        gone: HashSet::from(["https://push.example.com/gone".to_string()]),
        flaky: HashSet::from(["https://push.example.com/flaky".to_string()]),
        ..Default::default()
    });
    let relay = relay_with(Arc::new(InMemoryMessageStore::new()), transport.clone());
    let (origin, mut rx_origin) = relay.connect().await;
    let mut others = Vec::new();
    let mut sessions = Vec::new();
    for endpoint in ["gone", "flaky", "ok"] {
        let (id, rx) = relay.connect().await;
        sessions.push(rx);
        relay
            .subscribe_push(
                id,
                PushSubscription::new(format!("https://push.example.com/{endpoint}")),
            )
        .await
        .unwrap();
        others.push(id);
    }

    let accepted = relay
        .submit_chat(origin, NewMessage::new("A", "hi"))
        .await
        .expect("push failures never fail the submission");

    assert_eq!(accepted.notifications.attempted(), 3);
    assert_eq!(accepted.notifications.delivered(), 1);
    assert_eq!(accepted.notifications.transient_failures(), 1);
    assert_eq!(accepted.notifications.removed(), vec![others[0]]);

    assert!(relay.subscriptions().get(others[0]).await.is_none());
    assert!(relay.subscriptions().get(others[1]).await.is_some());
    assert!(relay.subscriptions().get(others[2]).await.is_some());

    // No error reaches the sender
    let events = drain(&mut rx_origin);
    assert!(!events.iter().any(|e| matches!(e, ServerEvent::Error(_))));
}

#[tokio::test]
async fn test_concurrent_registrations_through_relay_emit_one_edge() {
    let relay = relay_with(
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(RecordingTransport::default()),
    );
    let (_watcher, mut rx_w) = relay.connect().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let relay = relay.clone();
        handles.push(tokio::spawn(async move {
            let (id, rx) = relay.connect().await;
            relay.register_device(id, format!("d{i}")).await.unwrap();
            (id, rx)
        }));
    }
    let mut ids: Vec<ConnectionId> = Vec::new();
    let mut sessions = Vec::new();
    for handle in handles {
        let (id, rx) = handle.await.unwrap();
        ids.push(id);
        sessions.push(rx);
    }
    assert_eq!(status_events(&drain(&mut rx_w)), vec![PresenceState::Online]);

    let mut handles = Vec::new();
    for id in ids {
        let relay = relay.clone();
        handles.push(tokio::spawn(async move { relay.disconnect(id).await }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(status_events(&drain(&mut rx_w)), vec![PresenceState::Offline]);
}

#[tokio::test]
async fn test_events_after_disconnect_leave_no_state() {
    let relay = relay_with(
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(RecordingTransport::default()),
    );
    let (a, _rx_a) = relay.connect().await;
    let (_watcher, mut rx_w) = relay.connect().await;
    relay.disconnect(a).await;

    relay
        .handle_event(a, ClientEvent::RegisterDevice { device_id: "d1".into() })
        .await;
    relay
        .handle_event(
            a,
            ClientEvent::PushSubscription {
                subscription: PushSubscription::new("https://push.example.com/a"),
            },
        )
        .await;

    assert!(relay.register_device(a, "d1".into()).await.is_err());
    assert_eq!(relay.presence().state().await, PresenceState::Offline);
    assert_eq!(relay.presence().snapshot_size().await, 0);
    assert!(relay.subscriptions().is_empty().await);
    assert!(status_events(&drain(&mut rx_w)).is_empty());
}

#[tokio::test]
async fn test_replay_window_keeps_newest_messages() {
    let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();
    let stored = [3, 1, 2]
        .into_iter()
        .map(|secs| Message {
            sender: "A".into(),
            text: format!("m{secs}"),
            timestamp: at(secs),
        })
        .collect();
    let relay = ChatRelay::new(
        Arc::new(InMemoryMessageStore::with_messages(stored)),
        Arc::new(RecordingTransport::default()),
        Arc::new(HtmlEscaper),
        &push_config(),
        2,
    );
    let (a, mut rx_a) = relay.connect().await;
    relay.register_device(a, "d1".into()).await.unwrap();

    let replay = drain(&mut rx_a)
        .into_iter()
        .find_map(|e| match e {
            ServerEvent::PreviousMessages(messages) => Some(messages),
            _ => None,
        })
        .expect("replay sent");
    let secs: Vec<i64> = replay.iter().map(|m| m.timestamp.timestamp()).collect();
    assert_eq!(secs, vec![2, 3]);
}
