//! Notification queue database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::notification::NotificationColumns;
use super::to_json;
use crate::database::time::{datetime_to_ms, duration_to_ms, ms_to_datetime};
use crate::domain::Notification;
use crate::queue::QueueMessage;
use crate::{Error, Result};

/// Queue row: the wrapped notification plus delivery state.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueMessageDbModel {
    pub id: String,
    pub notification_id: String,
    pub namespace_id: Option<i64>,
    pub notification_type: String,
    pub data: String,
    pub labels: String,
    pub valid_duration_ms: Option<i64>,
    pub template: Option<String>,
    pub unique_key: Option<String>,
    pub alert_ids: String,
    /// Set for `receiver` notifications; `NULL` rows are claimable by every handler.
    pub receiver_type: Option<String>,
    /// pending, processing, published, failed
    pub status: String,
    /// normal, dlq
    pub strategy: String,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub retryable: bool,
    /// Lease token of the current claimant.
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub notification_created_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QueueMessageDbModel {
    /// Fresh `pending` row for a notification.
    pub fn new_pending(
        notification: &Notification,
        receiver_type: Option<String>,
        now_ms: i64,
    ) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            notification_id: notification.id.clone(),
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
            receiver_type,
            status: MessageStatus::Pending.as_str().to_string(),
            strategy: Strategy::Normal.as_str().to_string(),
            attempt_count: 0,
            last_error: None,
            retryable: false,
            claimed_by: None,
            claimed_at: None,
            expires_at: notification.expires_at().map(datetime_to_ms),
            notification_created_at: datetime_to_ms(notification.created_at),
            created_at: now_ms,
            updated_at: now_ms,
        })
    }

    pub fn into_domain(self) -> Result<QueueMessage> {
        let status = MessageStatus::parse(&self.status)
            .ok_or_else(|| Error::Database(format!("unknown queue status '{}'", self.status)))?;
        let strategy = Strategy::parse(&self.strategy).ok_or_else(|| {
            Error::Database(format!("unknown queue strategy '{}'", self.strategy))
        })?;

        let notification = NotificationColumns {
            id: self.notification_id,
            namespace_id: self.namespace_id,
            notification_type: &self.notification_type,
            data: &self.data,
            labels: &self.labels,
            valid_duration_ms: self.valid_duration_ms,
            template: self.template,
            unique_key: self.unique_key,
            alert_ids: &self.alert_ids,
            created_at: self.notification_created_at,
        }
        .into_domain()?;

        Ok(QueueMessage {
            id: self.id,
            notification,
            receiver_type: self.receiver_type,
            status,
            strategy,
            attempt_count: u32::try_from(self.attempt_count).unwrap_or(0),
            last_error: self.last_error,
            retryable: self.retryable,
            claimed_by: self.claimed_by,
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
        })
    }
}

/// Queue message lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting to be claimed by a normal-strategy handler.
    Pending,
    /// Leased by a claimant.
    Processing,
    /// Delivered (or deliberately skipped); terminal.
    Published,
    /// Dead-lettered; re-driven by the DLQ handler while `retryable` holds.
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "published" => Some(Self::Published),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Failed)
    }
}

/// Which backlog a queue instance drains.
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
pub enum Strategy {
    Normal,
    Dlq,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Dlq => "dlq",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "dlq" => Some(Self::Dlq),
            _ => None,
        }
    }

    /// Status a claimable row of this strategy sits in.
    pub fn idle_status(&self) -> MessageStatus {
        match self {
            Self::Normal => MessageStatus::Pending,
            Self::Dlq => MessageStatus::Failed,
        }
    }
}
