//! Application configuration.
//!
//! Loaded from an optional TOML file, then overridden from the environment
//! (after `.env` is read by dotenvy). Every section has defaults, so an empty
//! file or no file at all is a valid configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::notifier::{DEFAULT_PAGERDUTY_API_HOST, DEFAULT_SLACK_API_HOST};
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:herald.db?mode=rwc";
pub const DEFAULT_LOG_FILTER: &str = "herald=info,sqlx=warn";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub idempotency: IdempotencyConfig,
    pub maintenance: MaintenanceConfig,
    pub receivers: ReceiversConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Messages claimed per tick.
    pub batch_size: usize,
    /// Attempts before a message is dead-lettered.
    pub max_attempts: u32,
    /// Re-drives before a dead-lettered message is parked.
    pub dlq_max_attempts: u32,
    /// Per-send timeout.
    pub send_timeout_secs: u64,
    /// Receiver types this process delivers; empty means every registered type.
    pub receiver_types: Vec<String>,
    pub notification_handler: HandlerWorkerConfig,
    pub dlq_handler: HandlerWorkerConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            max_attempts: 3,
            dlq_max_attempts: 3,
            send_timeout_secs: 30,
            receiver_types: Vec::new(),
            notification_handler: HandlerWorkerConfig::default(),
            dlq_handler: HandlerWorkerConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerWorkerConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// Ticker id used in logs; generated when empty.
    pub identifier: String,
}

impl Default for HandlerWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 5,
            identifier: String::new(),
        }
    }
}

impl HandlerWorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Leases older than this are reclaimed by maintenance.
    pub lease_timeout_secs: u64,
    /// Retention of published and failed rows.
    pub cleanup_ttl_secs: u64,
    /// Retention of never-claimed rows; unset keeps them.
    pub cleanup_pending_ttl_secs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_timeout_secs: 5 * 60,
            cleanup_ttl_secs: 7 * 60 * 60,
            cleanup_pending_ttl_secs: None,
        }
    }
}

impl QueueConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn cleanup_ttl(&self) -> Duration {
        Duration::from_secs(self.cleanup_ttl_secs)
    }

    pub fn cleanup_pending_ttl(&self) -> Option<Duration> {
        self.cleanup_pending_ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Run maintenance alongside workers.
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60 * 60,
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiversConfig {
    pub slack_api_host: String,
    /// Minimum spacing between posts to one Slack channel.
    pub slack_min_interval_ms: u64,
    pub pagerduty_api_host: String,
    pub http_timeout_secs: u64,
}

impl Default for ReceiversConfig {
    fn default() -> Self {
        Self {
            slack_api_host: DEFAULT_SLACK_API_HOST.to_string(),
            slack_min_interval_ms: 1000,
            pagerduty_api_host: DEFAULT_PAGERDUTY_API_HOST.to_string(),
            http_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// JSON console output.
    pub json: bool,
    /// Daily rolling log files are written here when set.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
            dir: None,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::config(format!("{key}={raw:?}: {e}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{key}={raw:?}: expected a boolean"))),
    }
}

impl AppConfig {
    /// Read `.env`, the optional TOML file and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(e.to_string()))
    }

    /// Apply environment overrides read through `get`.
    pub fn apply_env<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = get("HERALD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("HERALD_DATABASE_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = get("HERALD_WORKER_BATCH_SIZE") {
            self.worker.batch_size = parse_env("HERALD_WORKER_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("HERALD_WORKER_MAX_ATTEMPTS") {
            self.worker.max_attempts = parse_env("HERALD_WORKER_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("HERALD_WORKER_DLQ_MAX_ATTEMPTS") {
            self.worker.dlq_max_attempts = parse_env("HERALD_WORKER_DLQ_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("HERALD_WORKER_SEND_TIMEOUT_SECS") {
            self.worker.send_timeout_secs = parse_env("HERALD_WORKER_SEND_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("HERALD_WORKER_RECEIVER_TYPES") {
            self.worker.receiver_types = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("HERALD_QUEUE_CLEANUP_TTL_SECS") {
            self.queue.cleanup_ttl_secs = parse_env("HERALD_QUEUE_CLEANUP_TTL_SECS", &v)?;
        }
        if let Some(v) = get("HERALD_IDEMPOTENCY_TTL_SECS") {
            self.idempotency.ttl_secs = parse_env("HERALD_IDEMPOTENCY_TTL_SECS", &v)?;
        }
        if let Some(v) = get("HERALD_SLACK_API_HOST") {
            self.receivers.slack_api_host = v;
        }
        if let Some(v) = get("HERALD_PAGERDUTY_API_HOST") {
            self.receivers.pagerduty_api_host = v;
        }
        if let Some(v) = get("HERALD_LOG_FILTER") {
            self.log.filter = v;
        }
        if let Some(v) = get("HERALD_LOG_JSON") {
            self.log.json = parse_bool("HERALD_LOG_JSON", &v)?;
        }
        if let Some(v) = get("HERALD_LOG_DIR") {
            self.log.dir = (!v.trim().is_empty()).then(|| PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(Error::config("database.url must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(Error::config("database.max_connections must be positive"));
        }
        if self.worker.batch_size == 0 {
            return Err(Error::config("worker.batch_size must be positive"));
        }
        if self.worker.max_attempts == 0 || self.worker.dlq_max_attempts == 0 {
            return Err(Error::config("worker attempt ceilings must be positive"));
        }
        if self.worker.send_timeout_secs == 0 {
            return Err(Error::config("worker.send_timeout_secs must be positive"));
        }
        for (name, handler) in [
            ("notification_handler", &self.worker.notification_handler),
            ("dlq_handler", &self.worker.dlq_handler),
        ] {
            if handler.poll_interval_secs == 0 {
                return Err(Error::config(format!(
                    "worker.{name}.poll_interval_secs must be positive"
                )));
            }
        }
        if self.queue.lease_timeout_secs == 0 {
            return Err(Error::config("queue.lease_timeout_secs must be positive"));
        }
        if self.maintenance.enabled && self.maintenance.interval_secs == 0 {
            return Err(Error::config("maintenance.interval_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.worker.batch_size, 1);
        assert_eq!(config.worker.max_attempts, 3);
        assert_eq!(config.worker.notification_handler.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.queue.cleanup_ttl(), Duration::from_secs(7 * 60 * 60));
        assert_eq!(config.idempotency.ttl(), Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [worker]
            batch_size = 10
            receiver_types = ["slack"]

            [worker.dlq_handler]
            enabled = false

            [log]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.batch_size, 10);
        assert_eq!(config.worker.receiver_types, vec!["slack"]);
        assert!(!config.worker.dlq_handler.enabled);
        assert_eq!(config.worker.dlq_handler.poll_interval_secs, 5);
        assert!(config.log.json);
        assert_eq!(config.database.url, DEFAULT_DATABASE_URL);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "sqlite::memory:"),
            ("HERALD_WORKER_BATCH_SIZE", "25"),
            ("HERALD_WORKER_RECEIVER_TYPES", "slack, file,"),
            ("HERALD_LOG_JSON", "yes"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.worker.batch_size, 25);
        assert_eq!(config.worker.receiver_types, vec!["slack", "file"]);
        assert!(config.log.json);
    }

    #[test]
    fn test_bad_env_value_is_configuration_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|key| (key == "HERALD_WORKER_BATCH_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.worker.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.worker.notification_handler.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.url = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_toml_type_is_error() {
        assert!(AppConfig::from_toml_str("[worker]\nbatch_size = \"x\"").is_err());
    }
}
