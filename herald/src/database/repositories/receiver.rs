//! Receiver repository.
//!
//! The handler only needs `get` (receiver id -> type + configuration); the
//! rest backs receiver management by the API layer.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::ReceiverDbModel;
use crate::database::time::now_ms;
use crate::domain::Receiver;
use crate::{Error, Result};

#[async_trait]
pub trait ReceiverRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Receiver>;
    async fn list(&self) -> Result<Vec<Receiver>>;
    /// Insert a receiver and return it with its assigned id.
    async fn create(&self, receiver: &Receiver) -> Result<Receiver>;
    async fn delete(&self, id: i64) -> Result<()>;
}

pub struct SqlxReceiverRepository {
    pool: SqlitePool,
}

impl SqlxReceiverRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReceiverRepository for SqlxReceiverRepository {
    async fn get(&self, id: i64) -> Result<Receiver> {
        sqlx::query_as::<_, ReceiverDbModel>("SELECT * FROM receiver WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Receiver", id.to_string()))?
            .into_domain()
    }

    async fn list(&self) -> Result<Vec<Receiver>> {
        sqlx::query_as::<_, ReceiverDbModel>("SELECT * FROM receiver ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ReceiverDbModel::into_domain)
            .collect()
    }

    async fn create(&self, receiver: &Receiver) -> Result<Receiver> {
        if receiver.receiver_type.is_empty() {
            return Err(Error::invalid("receiver type must not be empty"));
        }

        let model = ReceiverDbModel::from_domain(receiver)?;
        let now = now_ms();
        sqlx::query_as::<_, ReceiverDbModel>(
            r#"
            INSERT INTO receiver (name, receiver_type, configuration, labels, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&model.name)
        .bind(&model.receiver_type)
        .bind(&model.configuration)
        .bind(&model.labels)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?
        .into_domain()
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM receiver WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Receiver", id.to_string()));
        }
        Ok(())
    }
}
