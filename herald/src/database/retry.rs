//! Retry helpers for database operations.
//!
//! Claim and release run under `BEGIN IMMEDIATE`; when several worker
//! processes share one database file they can still observe `SQLITE_BUSY`
//! after the busy timeout, so those operations are wrapped here.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const SQLITE_BUSY_MAX_RETRIES: usize = 12;
const SQLITE_BUSY_BASE_DELAY_MS: u64 = 10;
const SQLITE_BUSY_MAX_DELAY_MS: u64 = 2000;

fn message_is_busy(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

pub(crate) fn is_sqlite_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        return message_is_busy(&sqlx_err.to_string());
    };

    // SQLITE_BUSY (5) and SQLITE_LOCKED (6)
    let code = db_err.code().map(Cow::into_owned);
    if matches!(code.as_deref(), Some("5") | Some("6")) {
        return true;
    }

    message_is_busy(db_err.message())
}

/// Backoff for the given zero-based attempt: exponential, capped, with up to
/// 25% jitter.
fn backoff_delay(attempt: usize) -> Duration {
    let exp_backoff_ms =
        SQLITE_BUSY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(20));
    let capped_ms = exp_backoff_ms.min(SQLITE_BUSY_MAX_DELAY_MS);
    let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
    Duration::from_millis((capped_ms + jitter_ms).min(SQLITE_BUSY_MAX_DELAY_MS))
}

pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_sqlite_busy_error(&err) || attempt >= SQLITE_BUSY_MAX_RETRIES {
                    return Err(err);
                }

                let delay = backoff_delay(attempt);
                debug!(
                    op = op_name,
                    ?delay,
                    attempt = attempt + 1,
                    max = SQLITE_BUSY_MAX_RETRIES,
                    "SQLite busy, retrying"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_is_capped() {
        for attempt in 0..30 {
            assert!(backoff_delay(attempt) <= Duration::from_millis(SQLITE_BUSY_MAX_DELAY_MS));
        }
    }

    #[tokio::test]
    async fn test_non_busy_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_on_sqlite_busy("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::invalid("nope")) }
        })
        .await;

        assert!(result.unwrap_err().is_invalid());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_busy_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let result = retry_on_sqlite_busy("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::DatabaseSqlx(sqlx::Error::Protocol(
                        "database is locked".to_string(),
                    )))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
