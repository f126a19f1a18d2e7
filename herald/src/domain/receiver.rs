//! Receiver entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JsonMap, Labels};

/// A configured delivery destination of a given type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receiver {
    pub id: i64,
    pub name: String,
    /// Registry key of the backend that delivers to this receiver.
    pub receiver_type: String,
    /// Backend-specific configuration (tokens, URLs, paths).
    #[serde(default)]
    pub configuration: JsonMap,
    #[serde(default)]
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Receiver {
    pub fn new(name: impl Into<String>, receiver_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            receiver_type: receiver_type.into(),
            configuration: JsonMap::new(),
            labels: Labels::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_config(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }
}
