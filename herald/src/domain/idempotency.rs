//! Idempotency record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deduplication ledger entry for one `(scope, key)` delivery identity.
///
/// `success` only ever flips from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idempotency {
    pub id: i64,
    pub scope: String,
    pub key: String,
    pub notification_id: String,
    pub success: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reaper filter: rows last touched more than `ttl` ago are removed.
#[derive(Debug, Clone, Copy)]
pub struct IdempotencyFilter {
    pub ttl: Duration,
}
