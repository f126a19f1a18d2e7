//! Notification log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Write-once audit row correlating a notification with the route it took
/// (or was kept from) and the silences that applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub id: String,
    pub namespace_id: Option<i64>,
    pub notification_id: String,
    pub subscription_id: Option<i64>,
    pub receiver_id: Option<i64>,
    pub alert_ids: Vec<i64>,
    pub silence_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NotificationLogEntry {
    pub fn new(notification_id: impl Into<String>, namespace_id: Option<i64>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            namespace_id,
            notification_id: notification_id.into(),
            subscription_id: None,
            receiver_id: None,
            alert_ids: Vec::new(),
            silence_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_silenced(&self) -> bool {
        !self.silence_ids.is_empty()
    }
}
