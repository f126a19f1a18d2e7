//! Notification queue.
//!
//! A durable, claimable backlog. A claimant leases up to N idle rows by moving
//! them to `processing` under a lease token; while leased a row is invisible to
//! every other claimant. `release` applies the handler's per-row outcome, and
//! only to rows still held by that lease. Rows abandoned by a crashed claimant
//! are returned by `reclaim_stale`.
//!
//! ```text
//! pending -> processing -> published                 (delivered)
//!                       -> pending, attempt+1         (retryable, below ceiling)
//!                       -> failed [dlq]               (ceiling reached or fatal)
//! failed [dlq, retryable] -> processing -> published | failed
//! ```

mod sqlite;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use crate::database::models::{MessageStatus, Strategy};
pub use sqlite::{DEFAULT_DLQ_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS, SqliteQueue, SqliteQueueConfig};

use crate::Result;
use crate::domain::Notification;

/// A queued notification together with its delivery state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub notification: Notification,
    pub receiver_type: Option<String>,
    pub status: MessageStatus,
    pub strategy: Strategy,
    /// Attempts made under the current strategy.
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Whether a dead-lettered row may still be re-driven.
    pub retryable: bool,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A notification to enqueue, with the receiver type it is routed to when
/// that is known up front.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub notification: Notification,
    pub receiver_type: Option<String>,
}

impl From<Notification> for NewMessage {
    fn from(notification: Notification) -> Self {
        Self {
            notification,
            receiver_type: None,
        }
    }
}

/// What happened to one claimed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Every route was delivered, skipped as already delivered, or silenced.
    Published,
    /// A retryable delivery failure. Counts an attempt; dead-letters at the ceiling.
    Retry { error: String },
    /// A non-retryable failure. `retryable` marks whether the DLQ may re-drive it.
    DeadLetter { error: String, retryable: bool },
    /// An infrastructure failure unrelated to the content. Returned to the
    /// idle state without counting an attempt.
    Requeue { error: String },
}

/// Per-message outcomes for one claimed batch, keyed by queue message id.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    outcomes: HashMap<String, MessageOutcome>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, message_id: impl Into<String>, outcome: MessageOutcome) {
        self.outcomes.insert(message_id.into(), outcome);
    }

    pub fn get(&self, message_id: &str) -> Option<&MessageOutcome> {
        self.outcomes.get(message_id)
    }

    /// Return every message of a batch to its idle state.
    pub fn requeue_all(messages: &[QueueMessage], error: impl Into<String>) -> Self {
        let error = error.into();
        let mut result = Self::new();
        for message in messages {
            result.set(
                &message.id,
                MessageOutcome::Requeue {
                    error: error.clone(),
                },
            );
        }
        result
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Restricts which rows a claimant may take.
#[derive(Debug, Clone, Default)]
pub struct ClaimFilter {
    /// Receiver types the claimant can deliver. Empty means no restriction.
    pub receiver_types: Vec<String>,
    /// Skip rows without a receiver type. Those are routed at delivery time
    /// and may reach any registered type.
    pub typed_only: bool,
}

/// Rows leased by one claim. Release it with [`Queue::release`].
#[derive(Debug, Clone)]
pub struct Lease {
    pub token: String,
    pub messages: Vec<QueueMessage>,
}

impl Lease {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Transition counts applied by a release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub requeued: usize,
    /// Rows whose lease had already been reclaimed; left untouched.
    pub lost: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CleanupFilter {
    /// Terminal rows last updated before `now - ttl` are deleted.
    pub ttl: Duration,
    /// When set, `pending` rows older than this are deleted as poison messages.
    pub pending_ttl: Option<Duration>,
    /// Report zero deleted rows as `NotFound`.
    pub fail_if_empty: bool,
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub published: u64,
    pub failed: u64,
}

/// Processes one claimed batch.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// An `Err` returns the whole batch to its idle state.
    async fn handle(&self, messages: &[QueueMessage]) -> Result<BatchResult>;
}

#[async_trait]
pub trait Queue: Send + Sync {
    /// Which backlog `claim_batch` draws from.
    fn strategy(&self) -> Strategy;

    /// Durably insert `pending` rows. Returns the queue message ids.
    async fn enqueue(&self, messages: Vec<NewMessage>) -> Result<Vec<String>>;

    /// Lease up to `batch_size` idle rows, oldest first.
    async fn claim_batch(&self, batch_size: usize, filter: &ClaimFilter) -> Result<Lease>;

    /// Apply per-row outcomes to the rows still held by `lease`.
    async fn release(&self, lease: &Lease, result: &BatchResult) -> Result<ReleaseSummary>;

    /// Delete rows past retention. Returns the number deleted.
    async fn cleanup(&self, filter: CleanupFilter) -> Result<u64>;

    /// Return rows leased longer than `lease_timeout` to their idle state.
    async fn reclaim_stale(&self, lease_timeout: Duration) -> Result<u64>;

    async fn get(&self, id: &str) -> Result<QueueMessage>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Claim a batch, hand it to `handler` and release it with the result.
    /// Returns the number of messages processed; zero when nothing was idle.
    async fn dequeue(
        &self,
        batch_size: usize,
        filter: &ClaimFilter,
        handler: &dyn BatchHandler,
    ) -> Result<usize> {
        let lease = self.claim_batch(batch_size, filter).await?;
        if lease.is_empty() {
            return Ok(0);
        }

        let result = match handler.handle(&lease.messages).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    lease = %lease.token,
                    count = lease.len(),
                    error = %e,
                    "Batch handler failed; returning batch to the queue"
                );
                BatchResult::requeue_all(&lease.messages, e.to_string())
            }
        };

        self.release(&lease, &result).await?;
        Ok(lease.len())
    }
}
