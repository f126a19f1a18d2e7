//! SQLite-backed notification queue.
//!
//! Claims run as a single `UPDATE ... WHERE id IN (SELECT ... LIMIT n)
//! RETURNING *` inside `BEGIN IMMEDIATE`. SQLite admits one writer at a time,
//! so two claimants can never select the same idle row; the loser of the
//! write lock sees the rows already in `processing`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, error, info, warn};

use super::{
    BatchResult, CleanupFilter, ClaimFilter, Lease, MessageOutcome, MessageStatus, NewMessage,
    Queue, QueueMessage, QueueStats, ReleaseSummary, Strategy,
};
use crate::database::models::{NotificationDbModel, QueueMessageDbModel};
use crate::database::repositories::NotificationTxOps;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{cutoff_ms, now_ms};
use crate::database::{DbPool, begin_immediate};
use crate::{Error, Result};

/// Default attempt ceiling for the normal strategy.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default attempt ceiling for re-drives from the dead-letter backlog.
pub const DEFAULT_DLQ_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct SqliteQueueConfig {
    pub strategy: Strategy,
    /// Normal strategy: the attempt that reaches this count dead-letters.
    pub max_attempts: u32,
    /// DLQ strategy: the re-drive that reaches this count parks the row.
    pub dlq_max_attempts: u32,
}

impl Default for SqliteQueueConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Normal,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            dlq_max_attempts: DEFAULT_DLQ_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionKind {
    Published,
    Retried,
    DeadLettered,
    Requeued,
}

/// Row state written by a release.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Transition {
    kind: TransitionKind,
    status: MessageStatus,
    strategy: Strategy,
    attempt_count: u32,
    retryable: bool,
    last_error: Option<String>,
}

/// Decide the next row state for a claimed message.
///
/// Moving from the normal backlog into the DLQ resets the attempt count, so
/// the DLQ ceiling counts re-drives only.
fn plan_transition(
    config: &SqliteQueueConfig,
    message: &QueueMessage,
    outcome: &MessageOutcome,
) -> Transition {
    let attempt = message.attempt_count.saturating_add(1);

    match (config.strategy, outcome) {
        (strategy, MessageOutcome::Published) => Transition {
            kind: TransitionKind::Published,
            status: MessageStatus::Published,
            strategy,
            attempt_count: attempt,
            retryable: false,
            last_error: None,
        },
        (Strategy::Normal, MessageOutcome::Retry { error }) if attempt < config.max_attempts => {
            Transition {
                kind: TransitionKind::Retried,
                status: MessageStatus::Pending,
                strategy: Strategy::Normal,
                attempt_count: attempt,
                retryable: false,
                last_error: Some(error.clone()),
            }
        }
        (Strategy::Normal, MessageOutcome::Retry { error }) => Transition {
            kind: TransitionKind::DeadLettered,
            status: MessageStatus::Failed,
            strategy: Strategy::Dlq,
            attempt_count: 0,
            retryable: true,
            last_error: Some(error.clone()),
        },
        (Strategy::Normal, MessageOutcome::DeadLetter { error, retryable }) => Transition {
            kind: TransitionKind::DeadLettered,
            status: MessageStatus::Failed,
            strategy: Strategy::Dlq,
            attempt_count: 0,
            retryable: *retryable,
            last_error: Some(error.clone()),
        },
        (Strategy::Dlq, MessageOutcome::Retry { error }) => {
            let retryable = attempt < config.dlq_max_attempts;
            Transition {
                kind: if retryable {
                    TransitionKind::Retried
                } else {
                    TransitionKind::DeadLettered
                },
                status: MessageStatus::Failed,
                strategy: Strategy::Dlq,
                attempt_count: attempt,
                retryable,
                last_error: Some(error.clone()),
            }
        }
        (Strategy::Dlq, MessageOutcome::DeadLetter { error, retryable }) => Transition {
            kind: TransitionKind::DeadLettered,
            status: MessageStatus::Failed,
            strategy: Strategy::Dlq,
            attempt_count: attempt,
            retryable: *retryable && attempt < config.dlq_max_attempts,
            last_error: Some(error.clone()),
        },
        (strategy, MessageOutcome::Requeue { error }) => Transition {
            kind: TransitionKind::Requeued,
            status: strategy.idle_status(),
            strategy,
            attempt_count: message.attempt_count,
            retryable: strategy == Strategy::Dlq,
            last_error: Some(error.clone()),
        },
    }
}

pub struct SqliteQueue {
    pool: DbPool,
    config: SqliteQueueConfig,
}

impl SqliteQueue {
    pub fn new(pool: DbPool, config: SqliteQueueConfig) -> Self {
        Self { pool, config }
    }

    /// Queue draining the normal backlog with default ceilings.
    pub fn normal(pool: DbPool) -> Self {
        Self::new(pool, SqliteQueueConfig::default())
    }

    /// Queue draining the dead-letter backlog with default ceilings.
    pub fn dlq(pool: DbPool) -> Self {
        Self::new(
            pool,
            SqliteQueueConfig {
                strategy: Strategy::Dlq,
                ..Default::default()
            },
        )
    }

    pub fn config(&self) -> &SqliteQueueConfig {
        &self.config
    }

    async fn try_enqueue(
        &self,
        rows: &[(NotificationDbModel, QueueMessageDbModel)],
    ) -> Result<()> {
        let mut tx = begin_immediate(&self.pool).await?;
        for (notification, message) in rows {
            NotificationTxOps::insert(&mut tx, notification).await?;
            sqlx::query(
                r#"
                INSERT INTO notification_queue (
                    id, notification_id, namespace_id, notification_type, data, labels,
                    valid_duration_ms, template, unique_key, alert_ids, receiver_type,
                    status, strategy, attempt_count, last_error, retryable,
                    claimed_by, claimed_at, expires_at, notification_created_at,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, NULL, NULL, ?, ?, ?, ?)
                "#,
            )
            .bind(&message.id)
            .bind(&message.notification_id)
            .bind(message.namespace_id)
            .bind(&message.notification_type)
            .bind(&message.data)
            .bind(&message.labels)
            .bind(message.valid_duration_ms)
            .bind(&message.template)
            .bind(&message.unique_key)
            .bind(&message.alert_ids)
            .bind(&message.receiver_type)
            .bind(&message.status)
            .bind(&message.strategy)
            .bind(message.attempt_count)
            .bind(message.expires_at)
            .bind(message.notification_created_at)
            .bind(message.created_at)
            .bind(message.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn try_claim(
        &self,
        batch_size: usize,
        filter: &ClaimFilter,
        token: &str,
    ) -> Result<Vec<QueueMessage>> {
        let now = now_ms();
        let strategy = self.config.strategy;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("UPDATE notification_queue SET status = ");
        qb.push_bind(MessageStatus::Processing.as_str())
            .push(", claimed_by = ")
            .push_bind(token.to_string())
            .push(", claimed_at = ")
            .push_bind(now)
            .push(", updated_at = ")
            .push_bind(now)
            .push(" WHERE id IN (SELECT id FROM notification_queue WHERE status = ")
            .push_bind(strategy.idle_status().as_str())
            .push(" AND strategy = ")
            .push_bind(strategy.as_str());

        if strategy == Strategy::Dlq {
            qb.push(" AND retryable = 1 AND attempt_count < ")
                .push_bind(i64::from(self.config.dlq_max_attempts));
        }

        if filter.typed_only {
            qb.push(" AND receiver_type IS NOT NULL");
        }
        if !filter.receiver_types.is_empty() {
            qb.push(" AND (receiver_type IS NULL OR receiver_type IN (");
            let mut types = qb.separated(", ");
            for receiver_type in &filter.receiver_types {
                types.push_bind(receiver_type.clone());
            }
            types.push_unseparated("))");
        }

        qb.push(" ORDER BY created_at, id LIMIT ")
            .push_bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .push(") RETURNING *");

        let mut tx = begin_immediate(&self.pool).await?;
        let mut rows = qb
            .build_query_as::<QueueMessageDbModel>()
            .fetch_all(&mut *tx)
            .await?;

        // RETURNING order is unspecified.
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match row.into_domain() {
                Ok(message) => messages.push(message),
                Err(e) => {
                    // Undecodable rows would be re-claimed forever; park them.
                    error!(message_id = %id, error = %e, "Parking undecodable queue row");
                    sqlx::query(
                        r#"
                        UPDATE notification_queue
                        SET status = 'failed', strategy = 'dlq', retryable = 0,
                            last_error = ?, claimed_by = NULL, claimed_at = NULL, updated_at = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(e.to_string())
                    .bind(now)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;

        Ok(messages)
    }

    async fn try_release(&self, lease: &Lease, result: &BatchResult) -> Result<ReleaseSummary> {
        let now = now_ms();
        let mut summary = ReleaseSummary::default();
        let missing = MessageOutcome::Requeue {
            error: "no outcome reported for message".to_string(),
        };

        let mut tx = begin_immediate(&self.pool).await?;
        for message in &lease.messages {
            let outcome = result.get(&message.id).unwrap_or(&missing);
            let next = plan_transition(&self.config, message, outcome);

            let updated = sqlx::query(
                r#"
                UPDATE notification_queue
                SET status = ?, strategy = ?, attempt_count = ?, retryable = ?,
                    last_error = COALESCE(?, last_error),
                    claimed_by = NULL, claimed_at = NULL, updated_at = ?
                WHERE id = ? AND status = 'processing' AND claimed_by = ?
                "#,
            )
            .bind(next.status.as_str())
            .bind(next.strategy.as_str())
            .bind(i64::from(next.attempt_count))
            .bind(next.retryable)
            .bind(&next.last_error)
            .bind(now)
            .bind(&message.id)
            .bind(&lease.token)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                warn!(
                    message_id = %message.id,
                    lease = %lease.token,
                    "Lease lost before release; outcome dropped"
                );
                summary.lost += 1;
                continue;
            }

            match next.kind {
                TransitionKind::Published => summary.published += 1,
                TransitionKind::Retried => summary.retried += 1,
                TransitionKind::DeadLettered => {
                    warn!(
                        message_id = %message.id,
                        notification_id = %message.notification.id,
                        retryable = next.retryable,
                        error = next.last_error.as_deref().unwrap_or_default(),
                        "Message dead-lettered"
                    );
                    summary.dead_lettered += 1;
                }
                TransitionKind::Requeued => summary.requeued += 1,
            }
        }
        tx.commit().await?;

        Ok(summary)
    }
}

#[async_trait]
impl Queue for SqliteQueue {
    fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    async fn enqueue(&self, messages: Vec<NewMessage>) -> Result<Vec<String>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let now = now_ms();
        let mut rows = Vec::with_capacity(messages.len());
        for message in &messages {
            message.notification.validate()?;
            let unserializable =
                |e: Error| Error::invalid(format!("unserializable notification payload: {e}"));
            let notification = NotificationDbModel::from_domain(&message.notification)
                .map_err(unserializable)?;
            let row = QueueMessageDbModel::new_pending(
                &message.notification,
                message.receiver_type.clone(),
                now,
            )
            .map_err(unserializable)?;
            rows.push((notification, row));
        }

        retry_on_sqlite_busy("queue_enqueue", || self.try_enqueue(&rows)).await?;

        let ids: Vec<String> = rows.into_iter().map(|(_, row)| row.id).collect();
        debug!(count = ids.len(), "Enqueued notifications");
        Ok(ids)
    }

    async fn claim_batch(&self, batch_size: usize, filter: &ClaimFilter) -> Result<Lease> {
        if batch_size == 0 {
            return Err(Error::invalid("batch size must be positive"));
        }

        let token = uuid::Uuid::new_v4().to_string();
        let messages =
            retry_on_sqlite_busy("queue_claim", || self.try_claim(batch_size, filter, &token))
                .await?;

        if !messages.is_empty() {
            debug!(
                strategy = %self.config.strategy,
                lease = %token,
                count = messages.len(),
                "Claimed queue messages"
            );
        }
        Ok(Lease { token, messages })
    }

    async fn release(&self, lease: &Lease, result: &BatchResult) -> Result<ReleaseSummary> {
        if lease.is_empty() {
            return Ok(ReleaseSummary::default());
        }
        let summary =
            retry_on_sqlite_busy("queue_release", || self.try_release(lease, result)).await?;
        debug!(strategy = %self.config.strategy, lease = %lease.token, ?summary, "Released lease");
        Ok(summary)
    }

    async fn cleanup(&self, filter: CleanupFilter) -> Result<u64> {
        if filter.ttl.is_zero() || filter.pending_ttl.is_some_and(|d| d.is_zero()) {
            return Err(Error::invalid(
                "cleanup ttl must be positive; refusing to delete every row",
            ));
        }

        let now = now_ms();
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "DELETE FROM notification_queue WHERE (status IN ('published', 'failed') AND updated_at < ",
        );
        qb.push_bind(cutoff_ms(now, filter.ttl)).push(")");
        if let Some(pending_ttl) = filter.pending_ttl {
            qb.push(" OR (status = 'pending' AND updated_at < ")
                .push_bind(cutoff_ms(now, pending_ttl))
                .push(")");
        }

        let deleted = qb.build().execute(&self.pool).await?.rows_affected();
        if deleted == 0 && filter.fail_if_empty {
            return Err(Error::not_found(
                "QueueMessage",
                format!("older than {:?}", filter.ttl),
            ));
        }

        info!(deleted, "Queue cleanup finished");
        Ok(deleted)
    }

    async fn reclaim_stale(&self, lease_timeout: Duration) -> Result<u64> {
        let now = now_ms();
        let reclaimed = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = CASE strategy WHEN 'dlq' THEN 'failed' ELSE 'pending' END,
                claimed_by = NULL, claimed_at = NULL,
                last_error = 'lease expired', updated_at = ?
            WHERE status = 'processing' AND claimed_at < ?
            "#,
        )
        .bind(now)
        .bind(cutoff_ms(now, lease_timeout))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if reclaimed > 0 {
            warn!(reclaimed, ?lease_timeout, "Reclaimed abandoned queue leases");
        }
        Ok(reclaimed)
    }

    async fn get(&self, id: &str) -> Result<QueueMessage> {
        sqlx::query_as::<_, QueueMessageDbModel>("SELECT * FROM notification_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("QueueMessage", id))?
            .into_domain()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM notification_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match MessageStatus::parse(&status) {
                Some(MessageStatus::Pending) => stats.pending = count,
                Some(MessageStatus::Processing) => stats.processing = count,
                Some(MessageStatus::Published) => stats.published = count,
                Some(MessageStatus::Failed) => stats.failed = count,
                None => warn!(status = %status, "Unknown queue status in stats"),
            }
        }
        Ok(stats)
    }
}
