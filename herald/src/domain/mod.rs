//! Domain entities of the dispatch pipeline.

pub mod idempotency;
pub mod notification;
pub mod notification_log;
pub mod receiver;
pub mod silence;
pub mod subscription;

use std::collections::BTreeMap;

pub use idempotency::{Idempotency, IdempotencyFilter};
pub use notification::{Notification, NotificationType, RECEIVER_ID_LABEL};
pub use notification_log::NotificationLogEntry;
pub use receiver::Receiver;
pub use silence::{RULE_KEY, Silence, SilenceFilter, SilenceStatus, SilenceType};
pub use subscription::{ReceiverMetadata, Subscription, SubscriptionFilter};

/// Label set attached to notifications, alerts and subscription matchers.
///
/// Key order is irrelevant for matching; a sorted map keeps the stored JSON
/// stable.
pub type Labels = BTreeMap<String, String>;

/// Free-form JSON object used for payload data and receiver configuration.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
