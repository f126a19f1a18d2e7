//! Idempotency repository.
//!
//! A durable `(scope, key) -> success` ledger. Creating an existing key is a
//! defined fetch, not a conflict: the caller inspects `success` to decide
//! whether a delivery already happened.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::IdempotencyDbModel;
use crate::database::time::{cutoff_ms, now_ms};
use crate::domain::{Idempotency, IdempotencyFilter};
use crate::{Error, Result};

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Insert the record or, if `(scope, key)` exists, touch and return it.
    async fn create(&self, scope: &str, key: &str, notification_id: &str) -> Result<Idempotency>;
    async fn check(&self, scope: &str, key: &str) -> Result<Idempotency>;
    /// The only transition that sets `success`. Irreversible.
    async fn mark_success(&self, id: i64) -> Result<()>;
    /// Remove records last touched before `now - ttl`. Returns the number removed.
    async fn delete(&self, filter: IdempotencyFilter) -> Result<u64>;
}

pub struct SqlxIdempotencyRepository {
    pool: SqlitePool,
}

impl SqlxIdempotencyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyRepository for SqlxIdempotencyRepository {
    async fn create(&self, scope: &str, key: &str, notification_id: &str) -> Result<Idempotency> {
        if scope.is_empty() || key.is_empty() {
            return Err(Error::invalid("idempotency scope and key must not be empty"));
        }

        let now = now_ms();
        let row = sqlx::query_as::<_, IdempotencyDbModel>(
            r#"
            INSERT INTO idempotency (scope, key, notification_id, success, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            ON CONFLICT (scope, key) DO UPDATE SET updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(scope)
        .bind(key)
        .bind(notification_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn check(&self, scope: &str, key: &str) -> Result<Idempotency> {
        sqlx::query_as::<_, IdempotencyDbModel>(
            "SELECT * FROM idempotency WHERE scope = ? AND key = ?",
        )
        .bind(scope)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .map(Into::into)
        .ok_or_else(|| Error::not_found("Idempotency", format!("{scope}/{key}")))
    }

    async fn mark_success(&self, id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE idempotency SET success = 1, updated_at = ? WHERE id = ?")
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Idempotency", id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, filter: IdempotencyFilter) -> Result<u64> {
        if filter.ttl.is_zero() {
            return Err(Error::invalid(
                "idempotency ttl must be positive; refusing to delete every record",
            ));
        }

        let result = sqlx::query("DELETE FROM idempotency WHERE updated_at < ?")
            .bind(cutoff_ms(now_ms(), filter.ttl))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(
                "Idempotency",
                format!("older than {:?}", filter.ttl),
            ));
        }
        Ok(result.rows_affected())
    }
}
