//! Database models.
//!
//! Rows map one-to-one onto the schema: JSON columns are kept as `String`,
//! timestamps as epoch milliseconds. Each model converts to and from its
//! domain entity.

pub mod idempotency;
pub mod notification;
pub mod notification_log;
pub mod queue;
pub mod receiver;
pub mod silence;
pub mod subscription;

pub use idempotency::*;
pub use notification::*;
pub use notification_log::*;
pub use queue::*;
pub use receiver::*;
pub use silence::*;
pub use subscription::*;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Error, Result};

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Database(format!("corrupt JSON in column '{column}': {e}")))
}
