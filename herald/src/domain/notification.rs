//! Notification entity.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JsonMap, Labels};
use crate::{Error, Result};

/// Label carrying the target receiver of a `receiver` notification.
pub const RECEIVER_ID_LABEL: &str = "receiver_id";

/// How a notification is addressed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// Addressed directly at one receiver through the `receiver_id` label.
    Receiver,
    /// Routed through subscriptions whose match set is a subset of the labels.
    Subscriber,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receiver => "receiver",
            Self::Subscriber => "subscriber",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "receiver" => Some(Self::Receiver),
            "subscriber" => Some(Self::Subscriber),
            _ => None,
        }
    }
}

/// A unit of work to deliver. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub namespace_id: Option<i64>,
    pub notification_type: NotificationType,
    #[serde(default)]
    pub data: JsonMap,
    #[serde(default)]
    pub labels: Labels,
    /// Time-to-live after `created_at`; past it the notification is never sent.
    /// Zero means no expiry.
    pub valid_duration: Option<Duration>,
    pub template: Option<String>,
    pub unique_key: Option<String>,
    #[serde(default)]
    pub alert_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(notification_type: NotificationType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            namespace_id: None,
            notification_type,
            data: JsonMap::new(),
            labels: Labels::new(),
            valid_duration: None,
            template: None,
            unique_key: None,
            alert_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Notification addressed at a single receiver.
    pub fn for_receiver(receiver_id: i64) -> Self {
        let mut notification = Self::new(NotificationType::Receiver);
        notification
            .labels
            .insert(RECEIVER_ID_LABEL.to_string(), receiver_id.to_string());
        notification
    }

    pub fn with_namespace(mut self, namespace_id: i64) -> Self {
        self.namespace_id = Some(namespace_id);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_data(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_valid_duration(mut self, valid_duration: Duration) -> Self {
        self.valid_duration = Some(valid_duration).filter(|d| !d.is_zero());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_alert_ids(mut self, alert_ids: Vec<i64>) -> Self {
        self.alert_ids = alert_ids;
        self
    }

    /// Reject notifications that can never be routed.
    pub fn validate(&self) -> Result<()> {
        match self.notification_type {
            NotificationType::Receiver => {
                self.receiver_id()?;
            }
            NotificationType::Subscriber => {
                if self.labels.is_empty() {
                    return Err(Error::invalid(
                        "subscriber notification must carry at least one label",
                    ));
                }
            }
        }
        Ok(())
    }

    /// The receiver a `receiver` notification is addressed at.
    pub fn receiver_id(&self) -> Result<i64> {
        let raw = self.labels.get(RECEIVER_ID_LABEL).ok_or_else(|| {
            Error::invalid(format!("missing '{RECEIVER_ID_LABEL}' label"))
        })?;
        match raw.trim().parse::<i64>() {
            Ok(id) if id != 0 => Ok(id),
            _ => Err(Error::invalid(format!(
                "invalid '{RECEIVER_ID_LABEL}' label: {raw:?}"
            ))),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = self.valid_duration.filter(|d| !d.is_zero())?;
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        self.created_at.checked_add_signed(ttl)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now >= expires_at)
    }
}
