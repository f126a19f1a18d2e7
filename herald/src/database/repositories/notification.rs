//! Notification repository.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use crate::database::models::NotificationDbModel;
use crate::domain::Notification;
use crate::{Error, Result};

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Notification>;
}

pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn get(&self, id: &str) -> Result<Notification> {
        sqlx::query_as::<_, NotificationDbModel>("SELECT * FROM notification WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Notification", id))?
            .into_domain()
    }
}

/// Notification writes that run inside a caller-owned transaction.
///
/// These do NOT commit; the queue persists the notification and its queue row
/// atomically.
pub struct NotificationTxOps;

impl NotificationTxOps {
    pub async fn insert(tx: &mut SqliteConnection, model: &NotificationDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification (
                id, namespace_id, notification_type, data, labels,
                valid_duration_ms, template, unique_key, alert_ids, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.id)
        .bind(model.namespace_id)
        .bind(&model.notification_type)
        .bind(&model.data)
        .bind(&model.labels)
        .bind(model.valid_duration_ms)
        .bind(&model.template)
        .bind(&model.unique_key)
        .bind(&model.alert_ids)
        .bind(model.created_at)
        .execute(tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::conflict(format!("notification '{}' already exists", model.id))
            }
            other => other.into(),
        })?;
        Ok(())
    }
}
