//! Subscription entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JsonMap, Labels};

/// A receiver attached to a subscription, with its per-subscription
/// configuration override (e.g. a chat channel name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverMetadata {
    pub id: i64,
    #[serde(default)]
    pub configuration: JsonMap,
}

impl ReceiverMetadata {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            configuration: JsonMap::new(),
        }
    }

    pub fn with_config(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }
}

/// A standing rule routing notifications whose labels contain `match_labels`
/// to a list of receivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub urn: String,
    pub namespace_id: i64,
    pub receivers: Vec<ReceiverMetadata>,
    pub match_labels: Labels,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// New, not yet persisted subscription (`id` is assigned on insert).
    pub fn new(urn: impl Into<String>, namespace_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            urn: urn.into(),
            namespace_id,
            receivers: Vec::new(),
            match_labels: Labels::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_match(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn with_receiver(mut self, receiver: ReceiverMetadata) -> Self {
        self.receivers.push(receiver);
        self
    }
}

/// Listing filter for subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub namespace_id: Option<i64>,
}
