//! Silence database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{from_json, to_json};
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::{Silence, SilenceType};
use crate::{Error, Result};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SilenceDbModel {
    pub id: String,
    pub namespace_id: i64,
    /// `subscription` or `matchers`
    pub silence_type: String,
    pub target_id: Option<i64>,
    /// JSON object
    pub target_expression: String,
    pub creator: String,
    pub comment: String,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

impl SilenceDbModel {
    pub fn from_domain(silence: &Silence) -> Result<Self> {
        Ok(Self {
            id: silence.id.clone(),
            namespace_id: silence.namespace_id,
            silence_type: silence.silence_type.as_str().to_string(),
            target_id: silence.target_id,
            target_expression: to_json(&silence.target_expression)?,
            creator: silence.creator.clone(),
            comment: silence.comment.clone(),
            created_at: datetime_to_ms(silence.created_at),
            deleted_at: silence.deleted_at.map(datetime_to_ms),
        })
    }

    pub fn into_domain(self) -> Result<Silence> {
        let silence_type = SilenceType::parse(&self.silence_type).ok_or_else(|| {
            Error::Database(format!("unknown silence type '{}'", self.silence_type))
        })?;
        Ok(Silence {
            id: self.id,
            namespace_id: self.namespace_id,
            silence_type,
            target_id: self.target_id,
            target_expression: from_json(&self.target_expression, "target_expression")?,
            creator: self.creator,
            comment: self.comment,
            created_at: ms_to_datetime(self.created_at),
            deleted_at: self.deleted_at.map(ms_to_datetime),
        })
    }
}
