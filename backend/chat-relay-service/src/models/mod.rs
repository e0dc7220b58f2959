pub mod message;
pub mod subscription;

pub use message::{Message, NewMessage};
pub use subscription::{PushSubscription, SubscriptionKeys};
