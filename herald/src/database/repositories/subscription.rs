//! Subscription repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::SubscriptionDbModel;
use crate::database::time::now_ms;
use crate::domain::{Subscription, SubscriptionFilter};
use crate::{Error, Result};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Subscription>;
    async fn list(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>>;
    /// Insert a subscription and return it with its assigned id.
    async fn create(&self, subscription: &Subscription) -> Result<Subscription>;
    async fn delete(&self, id: i64) -> Result<()>;
}

pub struct SqlxSubscriptionRepository {
    pool: SqlitePool,
}

impl SqlxSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SqlxSubscriptionRepository {
    async fn get(&self, id: i64) -> Result<Subscription> {
        sqlx::query_as::<_, SubscriptionDbModel>("SELECT * FROM subscription WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Subscription", id.to_string()))?
            .into_domain()
    }

    async fn list(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>> {
        let rows = match filter.namespace_id {
            Some(namespace_id) => {
                sqlx::query_as::<_, SubscriptionDbModel>(
                    "SELECT * FROM subscription WHERE namespace_id = ? ORDER BY id",
                )
                .bind(namespace_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SubscriptionDbModel>("SELECT * FROM subscription ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter()
            .map(SubscriptionDbModel::into_domain)
            .collect()
    }

    async fn create(&self, subscription: &Subscription) -> Result<Subscription> {
        if subscription.urn.is_empty() {
            return Err(Error::invalid("subscription urn must not be empty"));
        }

        let model = SubscriptionDbModel::from_domain(subscription)?;
        let now = now_ms();
        let created = sqlx::query_as::<_, SubscriptionDbModel>(
            r#"
            INSERT INTO subscription (urn, namespace_id, receivers, match_labels, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&model.urn)
        .bind(model.namespace_id)
        .bind(&model.receivers)
        .bind(&model.match_labels)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::conflict(format!(
                "subscription '{}' already exists in namespace {}",
                model.urn, model.namespace_id
            )),
            other => other.into(),
        })?;

        created.into_domain()
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM subscription WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Subscription", id.to_string()));
        }
        Ok(())
    }
}
