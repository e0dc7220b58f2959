pub mod message_store;
pub mod notification_dispatcher;
pub mod presence;
pub mod push_sender;
pub mod relay;
pub mod sanitizer;
pub mod subscription_registry;

pub use message_store::{InMemoryMessageStore, MessageStore, PgMessageStore, ScanOrder};
pub use notification_dispatcher::{DeliveryOutcome, DispatchReport, NotificationDispatcher};
pub use presence::PresenceTracker;
pub use push_sender::{HttpPushTransport, PushPayload, PushTransport};
pub use relay::{Accepted, ChatRelay};
pub use sanitizer::{HtmlEscaper, Sanitizer};
pub use subscription_registry::SubscriptionRegistry;
