//! Notification database model.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{from_json, to_json};
use crate::database::time::{datetime_to_ms, duration_to_ms, ms_to_datetime};
use crate::domain::{Notification, NotificationType};
use crate::{Error, Result};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: String,
    pub namespace_id: Option<i64>,
    /// `receiver` or `subscriber`
    pub notification_type: String,
    /// JSON object
    pub data: String,
    /// JSON object of string labels
    pub labels: String,
    pub valid_duration_ms: Option<i64>,
    pub template: Option<String>,
    pub unique_key: Option<String>,
    /// JSON array of alert ids
    pub alert_ids: String,
    pub created_at: i64,
}

impl NotificationDbModel {
    pub fn from_domain(notification: &Notification) -> Result<Self> {
        Ok(Self {
            id: notification.id.clone(),
            namespace_id: notification.namespace_id,
            notification_type: notification.notification_type.as_str().to_string(),
            data: to_json(&notification.data)?,
            labels: to_json(&notification.labels)?,
            valid_duration_ms: notification
                .valid_duration
                .filter(|d| !d.is_zero())
                .map(duration_to_ms),
            template: notification.template.clone(),
            unique_key: notification.unique_key.clone(),
            alert_ids: to_json(&notification.alert_ids)?,
            created_at: datetime_to_ms(notification.created_at),
        })
    }

    pub fn into_domain(self) -> Result<Notification> {
        NotificationColumns {
            id: self.id,
            namespace_id: self.namespace_id,
            notification_type: &self.notification_type,
            data: &self.data,
            labels: &self.labels,
            valid_duration_ms: self.valid_duration_ms,
            template: self.template,
            unique_key: self.unique_key,
            alert_ids: &self.alert_ids,
            created_at: self.created_at,
        }
        .into_domain()
    }
}

/// Notification columns as stored in both `notification` and
/// `notification_queue`.
pub(crate) struct NotificationColumns<'a> {
    pub id: String,
    pub namespace_id: Option<i64>,
    pub notification_type: &'a str,
    pub data: &'a str,
    pub labels: &'a str,
    pub valid_duration_ms: Option<i64>,
    pub template: Option<String>,
    pub unique_key: Option<String>,
    pub alert_ids: &'a str,
    pub created_at: i64,
}

impl NotificationColumns<'_> {
    pub fn into_domain(self) -> Result<Notification> {
        let notification_type = NotificationType::parse(self.notification_type).ok_or_else(|| {
            Error::Database(format!(
                "unknown notification type '{}'",
                self.notification_type
            ))
        })?;

        Ok(Notification {
            id: self.id,
            namespace_id: self.namespace_id,
            notification_type,
            data: from_json(self.data, "data")?,
            labels: from_json(self.labels, "labels")?,
            valid_duration: self
                .valid_duration_ms
                .filter(|ms| *ms > 0)
                .map(|ms| Duration::from_millis(ms as u64)),
            template: self.template,
            unique_key: self.unique_key,
            alert_ids: from_json(self.alert_ids, "alert_ids")?,
            created_at: ms_to_datetime(self.created_at),
        })
    }
}
