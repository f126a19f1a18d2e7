//! Alert repository.
//!
//! Alerts are ingested by the API layer; the dispatch pipeline only records
//! how much of an alert's routing was silenced.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::time::now_ms;
use crate::domain::SilenceStatus;
use crate::{Error, Result};

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn update_silence_status(&self, alert_ids: &[i64], status: SilenceStatus) -> Result<()>;
    async fn get_silence_status(&self, alert_id: i64) -> Result<Option<SilenceStatus>>;
}

pub struct SqlxAlertRepository {
    pool: SqlitePool,
}

impl SqlxAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a bare alert row and return its id.
    pub async fn create(&self, namespace_id: Option<i64>, severity: &str) -> Result<i64> {
        let now = now_ms();
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO alert (namespace_id, severity, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(namespace_id)
        .bind(severity)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl AlertRepository for SqlxAlertRepository {
    async fn update_silence_status(&self, alert_ids: &[i64], status: SilenceStatus) -> Result<()> {
        if alert_ids.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("UPDATE alert SET silence_status = ");
        qb.push_bind(status.as_str())
            .push(", updated_at = ")
            .push_bind(now_ms())
            .push(" WHERE id IN (");
        let mut ids = qb.separated(", ");
        for id in alert_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn get_silence_status(&self, alert_id: i64) -> Result<Option<SilenceStatus>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT silence_status FROM alert WHERE id = ?")
                .bind(alert_id)
                .fetch_optional(&self.pool)
                .await?;

        let (status,) = row.ok_or_else(|| Error::not_found("Alert", alert_id.to_string()))?;
        status
            .map(|s| {
                s.parse::<SilenceStatus>()
                    .map_err(|_| Error::Database(format!("unknown silence status '{s}'")))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;

    #[tokio::test]
    async fn test_update_silence_status() {
        let repo = SqlxAlertRepository::new(init_memory_pool().await.unwrap());
        let a = repo.create(Some(1), "CRITICAL").await.unwrap();
        let b = repo.create(Some(1), "WARNING").await.unwrap();
        let c = repo.create(Some(1), "WARNING").await.unwrap();

        assert_eq!(repo.get_silence_status(a).await.unwrap(), None);

        repo.update_silence_status(&[a, b], SilenceStatus::Partial)
            .await
            .unwrap();

        assert_eq!(
            repo.get_silence_status(a).await.unwrap(),
            Some(SilenceStatus::Partial)
        );
        assert_eq!(
            repo.get_silence_status(b).await.unwrap(),
            Some(SilenceStatus::Partial)
        );
        assert_eq!(repo.get_silence_status(c).await.unwrap(), None);
        assert!(repo.get_silence_status(999).await.unwrap_err().is_not_found());
    }
}
