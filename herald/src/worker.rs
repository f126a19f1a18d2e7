//! Worker ticker: drives a handler at a fixed poll interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::handler::NotificationHandler;

/// Work done on every tick.
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn tick(&self, now: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
impl TickHandler for NotificationHandler {
    async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let processed = self.process().await?;
        debug!(handler = %self.identifier(), processed, at = %now, "Tick");
        Ok(())
    }
}

pub struct Ticker {
    id: String,
    poll_interval: Duration,
}

impl Ticker {
    /// An empty `id` gets a random one.
    pub fn new(id: impl Into<String>, poll_interval: Duration) -> Self {
        let mut id = id.into();
        if id.is_empty() {
            id = uuid::Uuid::new_v4().to_string();
        }
        Self { id, poll_interval }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tick until either token is cancelled.
    ///
    /// `ctx` is the process context; `stop` requests an orderly stop. Both are
    /// only observed between ticks, so a tick in flight always completes.
    /// Handler errors are logged and the loop goes on.
    pub async fn run(
        &self,
        ctx: CancellationToken,
        stop: CancellationToken,
        handler: Arc<dyn TickHandler>,
    ) {
        info!(worker = %self.id, interval = ?self.poll_interval, "Worker started");

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = handler.tick(Utc::now()).await {
                error!(worker = %self.id, error = %e, "Worker tick failed");
            }
        }

        info!(worker = %self.id, "Worker stopped");
    }
}
