//! Delivery backends.
//!
//! A [`Notifier`] delivers one payload to one receiver. Backends classify their
//! own failures as [`SendError::Retryable`] or [`SendError::Fatal`]; the
//! handler turns that classification into queue transitions.
//!
//! The [`NotifierRegistry`] maps receiver types to backends. It is built once
//! at startup and shared read-only.

mod file;
mod pagerduty;
mod slack;
mod webhook;

pub use file::FileNotifier;
pub use pagerduty::{DEFAULT_PAGERDUTY_API_HOST, PagerDutyNotifier};
pub use slack::{DEFAULT_SLACK_API_HOST, SlackNotifier};
pub use webhook::{WebhookAuth, WebhookConfig, WebhookNotifier};

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ReceiversConfig;
use crate::domain::{JsonMap, Labels, Notification};

/// Classified delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Transient: rate limited, 5xx, transport failure, timeout.
    #[error("retryable: {0}")]
    Retryable(String),
    /// Permanent: bad configuration, rejected payload, unknown receiver.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl SendError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// What a backend delivers: one notification addressed to one receiver.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPayload {
    pub notification_id: String,
    pub namespace_id: Option<i64>,
    pub subscription_id: Option<i64>,
    pub receiver_id: i64,
    pub labels: Labels,
    pub data: JsonMap,
    pub template: Option<String>,
    pub unique_key: Option<String>,
    pub alert_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryPayload {
    pub fn new(
        notification: &Notification,
        receiver_id: i64,
        subscription_id: Option<i64>,
    ) -> Self {
        Self {
            notification_id: notification.id.clone(),
            namespace_id: notification.namespace_id,
            subscription_id,
            receiver_id,
            labels: notification.labels.clone(),
            data: notification.data.clone(),
            template: notification.template.clone(),
            unique_key: notification.unique_key.clone(),
            alert_ids: notification.alert_ids.clone(),
            created_at: notification.created_at,
        }
    }

    fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Human-readable summary used by chat and pager backends.
    pub fn text(&self) -> String {
        if let Some(text) = ["text", "summary", "title", "description"]
            .iter()
            .find_map(|key| self.data_str(key))
        {
            return text.to_string();
        }

        let labels = self
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("notification {} [{labels}]", self.notification_id)
    }
}

/// A delivery backend for one receiver type.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Receiver type this backend serves, e.g. `"slack"`.
    fn receiver_type(&self) -> &str;

    /// Validate and normalise the merged receiver configuration before
    /// sending. Failures are fatal.
    async fn prepare_config(&self, config: JsonMap) -> Result<JsonMap, SendError> {
        Ok(config)
    }

    async fn send(&self, payload: &DeliveryPayload, config: &JsonMap) -> Result<(), SendError>;
}

/// Immutable receiver type -> backend map.
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend. A later backend for the same type replaces the earlier.
    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        let receiver_type = notifier.receiver_type().to_string();
        if self.notifiers.insert(receiver_type.clone(), notifier).is_some() {
            warn!(receiver_type = %receiver_type, "Replacing registered notifier");
        }
        self
    }

    /// Registry with every built-in backend.
    pub fn with_defaults(config: &ReceiversConfig) -> Self {
        let client = http_client(Duration::from_secs(config.http_timeout_secs));
        Self::new()
            .with(Arc::new(SlackNotifier::new(
                client.clone(),
                &config.slack_api_host,
                Duration::from_millis(config.slack_min_interval_ms),
            )))
            .with(Arc::new(PagerDutyNotifier::new(
                client.clone(),
                &config.pagerduty_api_host,
            )))
            .with(Arc::new(WebhookNotifier::new(client)))
            .with(Arc::new(FileNotifier::new()))
    }

    pub fn get(&self, receiver_type: &str) -> Option<Arc<dyn Notifier>> {
        self.notifiers.get(receiver_type).cloned()
    }

    pub fn contains(&self, receiver_type: &str) -> bool {
        self.notifiers.contains_key(receiver_type)
    }

    /// Registered receiver types, sorted.
    pub fn receiver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.notifiers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl std::fmt::Debug for NotifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierRegistry")
            .field("receiver_types", &self.receiver_types())
            .finish()
    }
}

/// Install the process-wide rustls crypto provider once.
///
/// reqwest is built without a bundled provider.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Shared HTTP client for the HTTP backends.
pub fn http_client(timeout: Duration) -> Client {
    install_rustls_provider();

    let mut builder = Client::builder().user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")));
    if timeout > Duration::ZERO {
        builder = builder.timeout(timeout);
    }

    builder.build().unwrap_or_else(|error| {
        warn!(error = %error, "Failed to build configured HTTP client; using defaults");
        Client::new()
    })
}

/// Decode a receiver configuration map into a typed config.
pub(crate) fn decode_config<T: DeserializeOwned>(
    receiver_type: &str,
    config: &JsonMap,
) -> Result<T, SendError> {
    serde_json::from_value(serde_json::Value::Object(config.clone()))
        .map_err(|e| SendError::fatal(format!("invalid {receiver_type} configuration: {e}")))
}

/// Encode a typed config back into a configuration map.
pub(crate) fn encode_config<T: Serialize>(
    receiver_type: &str,
    config: &T,
) -> Result<JsonMap, SendError> {
    match serde_json::to_value(config) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(SendError::fatal(format!(
            "{receiver_type} configuration is not an object"
        ))),
        Err(e) => Err(SendError::fatal(format!(
            "invalid {receiver_type} configuration: {e}"
        ))),
    }
}

/// 429 and 5xx are retryable, any other non-2xx is fatal.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> Result<(), SendError> {
    if status.is_success() {
        return Ok(());
    }
    let msg = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(SendError::Retryable(msg))
    } else {
        Err(SendError::Fatal(msg))
    }
}

/// Transport failures are retryable unless the request could never be built.
pub(crate) fn classify_transport(error: reqwest::Error) -> SendError {
    if error.is_builder() {
        SendError::fatal(format!("invalid request: {error}"))
    } else {
        SendError::retryable(format!("request failed: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NotificationType;

    struct Noop(&'static str);

    #[async_trait]
    impl Notifier for Noop {
        fn receiver_type(&self) -> &str {
            self.0
        }

        async fn send(&self, _: &DeliveryPayload, _: &JsonMap) -> Result<(), SendError> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = NotifierRegistry::new()
            .with(Arc::new(Noop("slack")))
            .with(Arc::new(Noop("file")));

        assert!(registry.get("slack").is_some());
        assert!(registry.get("email").is_none());
        assert_eq!(registry.receiver_types(), vec!["file", "slack"]);
    }

    #[test]
    fn test_default_registry_has_builtin_backends() {
        let registry = NotifierRegistry::with_defaults(&ReceiversConfig::default());
        assert_eq!(
            registry.receiver_types(),
            vec!["file", "http", "pagerduty", "slack"]
        );
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::OK, "").is_ok());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").unwrap_err().is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").unwrap_err().is_retryable());
        assert!(!classify_status(StatusCode::NOT_FOUND, "").unwrap_err().is_retryable());
        assert!(!classify_status(StatusCode::PERMANENT_REDIRECT, "").unwrap_err().is_retryable());
    }

    #[test]
    fn test_payload_text_fallback() {
        let notification = Notification::new(NotificationType::Subscriber).with_label("team", "x");
        let payload = DeliveryPayload::new(&notification, 1, Some(2));
        assert!(payload.text().contains("team=x"));

        let notification = notification.with_data("summary", "disk full");
        assert_eq!(DeliveryPayload::new(&notification, 1, None).text(), "disk full");
    }
}
