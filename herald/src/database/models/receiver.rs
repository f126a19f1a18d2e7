//! Receiver database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{from_json, to_json};
use crate::Result;
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::Receiver;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReceiverDbModel {
    pub id: i64,
    pub name: String,
    pub receiver_type: String,
    /// JSON object
    pub configuration: String,
    /// JSON object
    pub labels: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ReceiverDbModel {
    pub fn from_domain(receiver: &Receiver) -> Result<Self> {
        Ok(Self {
            id: receiver.id,
            name: receiver.name.clone(),
            receiver_type: receiver.receiver_type.clone(),
            configuration: to_json(&receiver.configuration)?,
            labels: to_json(&receiver.labels)?,
            created_at: datetime_to_ms(receiver.created_at),
            updated_at: datetime_to_ms(receiver.updated_at),
        })
    }

    pub fn into_domain(self) -> Result<Receiver> {
        Ok(Receiver {
            id: self.id,
            name: self.name,
            receiver_type: self.receiver_type,
            configuration: from_json(&self.configuration, "configuration")?,
            labels: from_json(&self.labels, "labels")?,
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
        })
    }
}
