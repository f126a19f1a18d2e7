//! Periodic storage maintenance.
//!
//! Each pass:
//! - returns abandoned queue leases to their idle state
//! - deletes queue rows past retention
//! - reaps old idempotency records

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::IdempotencyRepository;
use crate::domain::IdempotencyFilter;
use crate::queue::{CleanupFilter, Queue};

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub interval: Duration,
    pub lease_timeout: Duration,
    pub queue_ttl: Duration,
    pub queue_pending_ttl: Option<Duration>,
    pub idempotency_ttl: Duration,
}

impl MaintenanceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: config.maintenance.interval(),
            lease_timeout: config.queue.lease_timeout(),
            queue_ttl: config.queue.cleanup_ttl(),
            queue_pending_ttl: config.queue.cleanup_pending_ttl(),
            idempotency_ttl: config.idempotency.ttl(),
        }
    }
}

/// Rows touched by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub reclaimed: u64,
    pub queue_deleted: u64,
    pub idempotency_deleted: u64,
}

pub struct MaintenanceScheduler {
    queue: Arc<dyn Queue>,
    idempotency: Arc<dyn IdempotencyRepository>,
    settings: MaintenanceSettings,
    cancel: CancellationToken,
}

impl MaintenanceScheduler {
    pub fn new(
        queue: Arc<dyn Queue>,
        idempotency: Arc<dyn IdempotencyRepository>,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            queue,
            idempotency,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Run passes every `interval` on a background task until stopped.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run_loop().await })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run_loop(&self) {
        info!(interval = ?self.settings.interval, "Maintenance scheduler started");
        let mut interval = tokio::time::interval(self.settings.interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.run_maintenance().await {
                error!(error = %e, "Maintenance error");
            }
        }

        info!("Maintenance scheduler stopped");
    }

    /// Run one pass.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        debug!("Starting maintenance pass");

        let reclaimed = self.queue.reclaim_stale(self.settings.lease_timeout).await?;

        let queue_deleted = self
            .queue
            .cleanup(CleanupFilter {
                ttl: self.settings.queue_ttl,
                pending_ttl: self.settings.queue_pending_ttl,
                fail_if_empty: false,
            })
            .await?;

        let idempotency_deleted = match self
            .idempotency
            .delete(IdempotencyFilter {
                ttl: self.settings.idempotency_ttl,
            })
            .await
        {
            Ok(deleted) => deleted,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };

        let report = MaintenanceReport {
            reclaimed,
            queue_deleted,
            idempotency_deleted,
        };
        if report != MaintenanceReport::default() {
            info!(?report, "Maintenance pass finished");
        }
        Ok(report)
    }
}
