//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::LogConfig;
use crate::{Error, Result};

const LOG_FILE_PREFIX: &str = "herald.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the filter: `RUST_LOG` wins over the configured directive.
fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| Error::config(format!("invalid log filter '{}': {e}", config.filter))),
    }
}

/// Install the global subscriber.
///
/// Console output is always on (JSON when configured). When `dir` is set a
/// daily rolling file is written too; keep the returned guard alive until
/// exit so buffered lines are flushed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    if config.json {
        layers.push(fmt::layer().json().with_current_span(false).boxed());
    } else {
        layers.push(fmt::layer().with_ansi(true).boxed());
    }

    let guard = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().with_writer(writer).with_ansi(false).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}
