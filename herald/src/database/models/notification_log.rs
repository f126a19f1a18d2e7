//! Notification log database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{from_json, to_json};
use crate::Result;
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::NotificationLogEntry;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationLogDbModel {
    pub id: String,
    pub namespace_id: Option<i64>,
    pub notification_id: String,
    pub subscription_id: Option<i64>,
    pub receiver_id: Option<i64>,
    /// JSON array of alert ids
    pub alert_ids: String,
    /// JSON array of silence ids
    pub silence_ids: String,
    pub created_at: i64,
}

impl NotificationLogDbModel {
    pub fn from_domain(entry: &NotificationLogEntry) -> Result<Self> {
        Ok(Self {
            id: entry.id.clone(),
            namespace_id: entry.namespace_id,
            notification_id: entry.notification_id.clone(),
            subscription_id: entry.subscription_id,
            receiver_id: entry.receiver_id,
            alert_ids: to_json(&entry.alert_ids)?,
            silence_ids: to_json(&entry.silence_ids)?,
            created_at: datetime_to_ms(entry.created_at),
        })
    }

    pub fn into_domain(self) -> Result<NotificationLogEntry> {
        Ok(NotificationLogEntry {
            id: self.id,
            namespace_id: self.namespace_id,
            notification_id: self.notification_id,
            subscription_id: self.subscription_id,
            receiver_id: self.receiver_id,
            alert_ids: from_json(&self.alert_ids, "alert_ids")?,
            silence_ids: from_json(&self.silence_ids, "silence_ids")?,
            created_at: ms_to_datetime(self.created_at),
        })
    }
}
