//! Subscription database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{from_json, to_json};
use crate::Result;
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::Subscription;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubscriptionDbModel {
    pub id: i64,
    pub urn: String,
    pub namespace_id: i64,
    /// JSON array of `{id, configuration}`
    pub receivers: String,
    /// JSON object of string labels
    pub match_labels: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SubscriptionDbModel {
    pub fn from_domain(subscription: &Subscription) -> Result<Self> {
        Ok(Self {
            id: subscription.id,
            urn: subscription.urn.clone(),
            namespace_id: subscription.namespace_id,
            receivers: to_json(&subscription.receivers)?,
            match_labels: to_json(&subscription.match_labels)?,
            created_at: datetime_to_ms(subscription.created_at),
            updated_at: datetime_to_ms(subscription.updated_at),
        })
    }

    pub fn into_domain(self) -> Result<Subscription> {
        Ok(Subscription {
            id: self.id,
            urn: self.urn,
            namespace_id: self.namespace_id,
            receivers: from_json(&self.receivers, "receivers")?,
            match_labels: from_json(&self.match_labels, "match_labels")?,
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
        })
    }
}
