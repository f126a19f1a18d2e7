use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use herald::config::AppConfig;
use herald::database::{self, DbPool};
use herald::database::repositories::{IdempotencyRepository, SqlxIdempotencyRepository};
use herald::domain::IdempotencyFilter;
use herald::handler::{HandlerConfig, HandlerDeps, NotificationHandler};
use herald::logging::init_logging;
use herald::maintenance::{MaintenanceScheduler, MaintenanceSettings};
use herald::notifier::NotifierRegistry;
use herald::queue::{CleanupFilter, Queue, SqliteQueue, SqliteQueueConfig, Strategy};
use herald::worker::{TickHandler, Ticker};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "HERALD_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Long-running workers
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// One-shot jobs
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerCommand {
    Start {
        #[command(subcommand)]
        worker: WorkerKind,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerKind {
    /// Drain the normal queue
    NotificationHandler(WorkerArgs),
    /// Re-drive the dead-letter queue
    NotificationDlqHandler(WorkerArgs),
}

#[derive(clap::Args, Debug)]
struct WorkerArgs {
    #[arg(long)]
    poll_interval_secs: Option<u64>,
    /// Worker id used in logs
    #[arg(long)]
    identifier: Option<String>,
}

#[derive(Subcommand, Debug)]
enum JobCommand {
    Run {
        #[command(subcommand)]
        job: Job,
    },
}

#[derive(Subcommand, Debug)]
enum Job {
    /// Delete queue rows past retention
    CleanupQueue {
        #[arg(long)]
        ttl_secs: Option<u64>,
        /// Also delete pending rows older than this
        #[arg(long)]
        pending_ttl_secs: Option<u64>,
    },
    /// Delete idempotency records past retention
    CleanupIdempotency {
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = init_logging(&config.log).context("Failed to initialise logging")?;

    let pool = database::init_pool(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.url))?;
    database::run_migrations(&pool).await?;

    let result = match args.command {
        Command::Migrate => {
            info!("Database is up to date");
            Ok(())
        }
        Command::Worker {
            command: WorkerCommand::Start { worker },
        } => run_worker(&config, &pool, worker).await,
        Command::Job {
            command: JobCommand::Run { job },
        } => run_job(&config, &pool, job).await,
    };

    pool.close().await;
    result
}

async fn run_worker(config: &AppConfig, pool: &DbPool, kind: WorkerKind) -> anyhow::Result<()> {
    let (strategy, worker_config, args) = match kind {
        WorkerKind::NotificationHandler(args) => {
            (Strategy::Normal, &config.worker.notification_handler, args)
        }
        WorkerKind::NotificationDlqHandler(args) => {
            (Strategy::Dlq, &config.worker.dlq_handler, args)
        }
    };
    if !worker_config.enabled {
        warn!(%strategy, "Handler disabled in configuration; exiting");
        return Ok(());
    }

    let write_pool = database::init_write_pool(&config.database.url).await?;
    let queue: Arc<dyn Queue> = Arc::new(SqliteQueue::new(
        write_pool.clone(),
        SqliteQueueConfig {
            strategy,
            max_attempts: config.worker.max_attempts,
            dlq_max_attempts: config.worker.dlq_max_attempts,
        },
    ));

    let registry = Arc::new(NotifierRegistry::with_defaults(&config.receivers));
    let identifier = match args.identifier {
        Some(identifier) => identifier,
        None if !worker_config.identifier.is_empty() => worker_config.identifier.clone(),
        None => match strategy {
            Strategy::Normal => "notification-handler".to_string(),
            Strategy::Dlq => "notification-dlq-handler".to_string(),
        },
    };
    let handler = NotificationHandler::new(
        HandlerDeps::sqlite(pool, queue.clone(), registry),
        HandlerConfig {
            identifier: identifier.clone(),
            batch_size: config.worker.batch_size,
            receiver_types: config.worker.receiver_types.clone(),
            send_timeout: config.worker.send_timeout(),
        },
    )?;

    let maintenance = config.maintenance.enabled.then(|| {
        let scheduler = Arc::new(MaintenanceScheduler::new(
            queue.clone(),
            Arc::new(SqlxIdempotencyRepository::new(pool.clone())),
            MaintenanceSettings::from_config(config),
        ));
        (scheduler.clone(), scheduler.start())
    });

    let poll_interval = args
        .poll_interval_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| worker_config.poll_interval());
    let ticker = Ticker::new(identifier, poll_interval);
    let ctx = CancellationToken::new();
    let stop = CancellationToken::new();

    let worker = {
        let handler: Arc<dyn TickHandler> = Arc::new(handler);
        let (ctx, stop) = (ctx.clone(), stop.clone());
        tokio::spawn(async move { ticker.run(ctx, stop, handler).await })
    };

    shutdown_signal().await;
    info!("Shutdown requested; finishing in-flight tick");

    // Phase one: stop scheduling and let the current tick finish.
    stop.cancel();
    if let Err(e) = worker.await {
        warn!(error = %e, "Worker task ended abnormally");
    }
    if let Some((scheduler, handle)) = maintenance {
        scheduler.stop();
        let _ = handle.await;
    }

    // Phase two: release resources.
    ctx.cancel();
    write_pool.close().await;
    info!("Worker stopped");
    Ok(())
}

async fn run_job(config: &AppConfig, pool: &DbPool, job: Job) -> anyhow::Result<()> {
    let deleted = match job {
        Job::CleanupQueue {
            ttl_secs,
            pending_ttl_secs,
        } => {
            let queue = SqliteQueue::normal(pool.clone());
            queue
                .cleanup(CleanupFilter {
                    ttl: ttl_secs
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| config.queue.cleanup_ttl()),
                    pending_ttl: pending_ttl_secs
                        .map(Duration::from_secs)
                        .or_else(|| config.queue.cleanup_pending_ttl()),
                    fail_if_empty: true,
                })
                .await
        }
        Job::CleanupIdempotency { ttl_secs } => {
            let repo = SqlxIdempotencyRepository::new(pool.clone());
            repo.delete(IdempotencyFilter {
                ttl: ttl_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| config.idempotency.ttl()),
            })
            .await
        }
    };

    match deleted {
        Ok(deleted) => info!(deleted, "Cleanup finished"),
        Err(e) if e.is_not_found() => info!("Nothing to clean"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
