//! Idempotency database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::ms_to_datetime;
use crate::domain::Idempotency;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IdempotencyDbModel {
    pub id: i64,
    pub scope: String,
    pub key: String,
    pub notification_id: String,
    pub success: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<IdempotencyDbModel> for Idempotency {
    fn from(row: IdempotencyDbModel) -> Self {
        Self {
            id: row.id,
            scope: row.scope,
            key: row.key,
            notification_id: row.notification_id,
            success: row.success,
            created_at: ms_to_datetime(row.created_at),
            updated_at: ms_to_datetime(row.updated_at),
        }
    }
}
