//! Slack receiver: `chat.postMessage` with a bot token.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::{
    DeliveryPayload, Notifier, SendError, classify_status, classify_transport, decode_config,
    encode_config,
};
use crate::domain::JsonMap;

pub const DEFAULT_SLACK_API_HOST: &str = "https://slack.com/api";

const CHANNEL_TYPE_CHANNEL: &str = "channel";
const CHANNEL_TYPE_USER: &str = "user";

/// Receiver configuration (`token`, `workspace`) merged with the
/// subscription's (`channel_name`, `channel_type`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlackConfig {
    token: String,
    #[serde(default)]
    workspace: String,
    channel_name: String,
    #[serde(default = "default_channel_type")]
    channel_type: String,
}

fn default_channel_type() -> String {
    CHANNEL_TYPE_CHANNEL.to_string()
}

impl SlackConfig {
    fn validate(&self) -> Result<(), SendError> {
        if self.token.trim().is_empty() {
            return Err(SendError::fatal("slack receiver token is empty"));
        }
        if self.channel_name.trim().is_empty() {
            return Err(SendError::fatal("slack channel_name is empty"));
        }
        if !matches!(self.channel_type.as_str(), CHANNEL_TYPE_CHANNEL | CHANNEL_TYPE_USER) {
            return Err(SendError::fatal(format!(
                "unknown slack channel type \"{}\"",
                self.channel_type
            )));
        }
        Ok(())
    }

    /// `chat.postMessage` accepts channel names and user ids alike.
    fn target(&self) -> String {
        match self.channel_type.as_str() {
            CHANNEL_TYPE_CHANNEL if !self.channel_name.starts_with('#') => {
                format!("#{}", self.channel_name)
            }
            _ => self.channel_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackNotifier {
    client: Client,
    api_host: String,
    /// Minimum spacing between two posts to the same channel.
    min_interval: Duration,
    next_slot: DashMap<String, Instant>,
}

impl SlackNotifier {
    pub const RECEIVER_TYPE: &'static str = "slack";

    pub fn new(client: Client, api_host: &str, min_interval: Duration) -> Self {
        let api_host = if api_host.is_empty() {
            DEFAULT_SLACK_API_HOST
        } else {
            api_host
        };
        Self {
            client,
            api_host: api_host.trim_end_matches('/').to_string(),
            min_interval,
            next_slot: DashMap::new(),
        }
    }

    /// Reserve the next send slot for `channel` and wait for it.
    async fn throttle(&self, channel: &str) {
        if self.min_interval.is_zero() {
            return;
        }

        let now = Instant::now();
        let wait = {
            let mut next = self.next_slot.entry(channel.to_string()).or_insert(now);
            let slot = (*next).max(now);
            *next = slot + self.min_interval;
            slot - now
        };

        if !wait.is_zero() {
            debug!(channel, ?wait, "Throttling slack channel");
            sleep(wait).await;
        }
    }

    fn build_message(payload: &DeliveryPayload, target: String) -> serde_json::Value {
        let mut message = json!({
            "channel": target,
            "text": payload.text(),
        });
        for key in ["blocks", "attachments", "icon_emoji", "username"] {
            if let Some(value) = payload.data.get(key) {
                message[key] = value.clone();
            }
        }
        message
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn receiver_type(&self) -> &str {
        Self::RECEIVER_TYPE
    }

    async fn prepare_config(&self, config: JsonMap) -> Result<JsonMap, SendError> {
        let config: SlackConfig = decode_config(Self::RECEIVER_TYPE, &config)?;
        config.validate()?;
        encode_config(Self::RECEIVER_TYPE, &config)
    }

    async fn send(&self, payload: &DeliveryPayload, config: &JsonMap) -> Result<(), SendError> {
        let config: SlackConfig = decode_config(Self::RECEIVER_TYPE, config)?;
        let target = config.target();
        self.throttle(&target).await;

        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_host))
            .bearer_auth(&config.token)
            .json(&Self::build_message(payload, target.clone()))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        classify_status(status, &body)?;

        let reply: PostMessageResponse = serde_json::from_str(&body)
            .map_err(|e| SendError::fatal(format!("unexpected slack response: {e}")))?;
        if !reply.ok {
            let error = reply.error.unwrap_or_else(|| "unknown_error".to_string());
            warn!(channel = %target, error = %error, "Slack rejected message");
            return if error == "ratelimited" {
                Err(SendError::Retryable(error))
            } else {
                Err(SendError::Fatal(format!(
                    "failed to send message to \"{}\": {error}",
                    config.channel_name
                )))
            };
        }

        debug!(channel = %target, notification_id = %payload.notification_id, "Slack message sent");
        Ok(())
    }
}
