//! Notification log repository.
//!
//! Append-only: entries are written once by the handler and never updated.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::NotificationLogDbModel;
use crate::domain::NotificationLogEntry;
use crate::Result;

#[async_trait]
pub trait NotificationLogRepository: Send + Sync {
    async fn append(&self, entries: &[NotificationLogEntry]) -> Result<()>;
    async fn list_by_notification(
        &self,
        notification_id: &str,
    ) -> Result<Vec<NotificationLogEntry>>;
    /// Entries in which the given silence suppressed a route.
    async fn list_by_silence(&self, silence_id: &str) -> Result<Vec<NotificationLogEntry>>;
}

pub struct SqlxNotificationLogRepository {
    pool: SqlitePool,
}

impl SqlxNotificationLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLogRepository for SqlxNotificationLogRepository {
    async fn append(&self, entries: &[NotificationLogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let model = NotificationLogDbModel::from_domain(entry)?;
            sqlx::query(
                r#"
                INSERT INTO notification_log (
                    id, namespace_id, notification_id, subscription_id, receiver_id,
                    alert_ids, silence_ids, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&model.id)
            .bind(model.namespace_id)
            .bind(&model.notification_id)
            .bind(model.subscription_id)
            .bind(model.receiver_id)
            .bind(&model.alert_ids)
            .bind(&model.silence_ids)
            .bind(model.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_by_notification(
        &self,
        notification_id: &str,
    ) -> Result<Vec<NotificationLogEntry>> {
        sqlx::query_as::<_, NotificationLogDbModel>(
            "SELECT * FROM notification_log WHERE notification_id = ? ORDER BY created_at, id",
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(NotificationLogDbModel::into_domain)
        .collect()
    }

    async fn list_by_silence(&self, silence_id: &str) -> Result<Vec<NotificationLogEntry>> {
        sqlx::query_as::<_, NotificationLogDbModel>(
            r#"
            SELECT nl.* FROM notification_log nl
            WHERE EXISTS (
                SELECT 1 FROM json_each(nl.silence_ids) s WHERE s.value = ?
            )
            ORDER BY nl.created_at, nl.id
            "#,
        )
        .bind(silence_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(NotificationLogDbModel::into_domain)
        .collect()
    }
}
