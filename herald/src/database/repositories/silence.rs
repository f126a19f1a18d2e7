//! Silence repository.
//!
//! Silences are never hard-deleted: `soft_delete` stamps `deleted_at` and every
//! listing only returns active rows, so removing a silence takes effect on the
//! next lookup while historical log rows keep their silence ids.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::models::SilenceDbModel;
use crate::database::time::now_ms;
use crate::domain::{Silence, SilenceFilter, SilenceType};
use crate::{Error, Result};

#[async_trait]
pub trait SilenceRepository: Send + Sync {
    async fn create(&self, silence: &Silence) -> Result<()>;
    /// Fetch a silence, including soft-deleted ones.
    async fn get(&self, id: &str) -> Result<Silence>;
    /// Active silences matching the filter.
    async fn list(&self, filter: &SilenceFilter) -> Result<Vec<Silence>>;
    async fn soft_delete(&self, id: &str) -> Result<()>;
}

pub struct SqlxSilenceRepository {
    pool: SqlitePool,
}

impl SqlxSilenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SilenceRepository for SqlxSilenceRepository {
    async fn create(&self, silence: &Silence) -> Result<()> {
        silence.validate()?;
        let model = SilenceDbModel::from_domain(silence)?;

        sqlx::query(
            r#"
            INSERT INTO silence (
                id, namespace_id, silence_type, target_id, target_expression,
                creator, comment, created_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(&model.id)
        .bind(model.namespace_id)
        .bind(&model.silence_type)
        .bind(model.target_id)
        .bind(&model.target_expression)
        .bind(&model.creator)
        .bind(&model.comment)
        .bind(model.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Silence> {
        sqlx::query_as::<_, SilenceDbModel>("SELECT * FROM silence WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Silence", id))?
            .into_domain()
    }

    async fn list(&self, filter: &SilenceFilter) -> Result<Vec<Silence>> {
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM silence WHERE deleted_at IS NULL");

        if let Some(namespace_id) = filter.namespace_id {
            qb.push(" AND namespace_id = ").push_bind(namespace_id);
        }
        if let Some(subscription_id) = filter.subscription_id {
            qb.push(" AND silence_type = ")
                .push_bind(SilenceType::Subscription.as_str())
                .push(" AND target_id = ")
                .push_bind(subscription_id);
        }
        if let Some(silence_type) = filter.silence_type {
            qb.push(" AND silence_type = ").push_bind(silence_type.as_str());
        }
        qb.push(" ORDER BY created_at, id");

        qb.build_query_as::<SilenceDbModel>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(SilenceDbModel::into_domain)
            .collect()
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE silence SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(now_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Silence", id));
        }
        Ok(())
    }
}
