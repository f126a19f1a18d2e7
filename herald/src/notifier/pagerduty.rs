//! PagerDuty receiver: Events API v1 `create_event`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    DeliveryPayload, Notifier, SendError, classify_status, classify_transport, decode_config,
    encode_config,
};
use crate::domain::JsonMap;

pub const DEFAULT_PAGERDUTY_API_HOST: &str = "https://events.pagerduty.com";

const CREATE_EVENT_PATH: &str = "/generic/2010-04-15/create_event.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PagerDutyConfig {
    service_key: String,
}

#[derive(Debug, Serialize)]
struct EventV1<'a> {
    service_key: &'a str,
    event_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    incident_key: Option<&'a str>,
    description: String,
    details: &'a JsonMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    client: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EventV1Response {
    status: String,
    #[serde(default)]
    message: String,
}

pub struct PagerDutyNotifier {
    client: Client,
    api_host: String,
}

impl PagerDutyNotifier {
    pub const RECEIVER_TYPE: &'static str = "pagerduty";

    pub fn new(client: Client, api_host: &str) -> Self {
        let api_host = if api_host.is_empty() {
            DEFAULT_PAGERDUTY_API_HOST
        } else {
            api_host
        };
        Self {
            client,
            api_host: api_host.trim_end_matches('/').to_string(),
        }
    }

    fn build_event<'a>(payload: &'a DeliveryPayload, service_key: &'a str) -> EventV1<'a> {
        EventV1 {
            service_key,
            event_type: payload.data_str("event_type").unwrap_or("trigger"),
            incident_key: payload
                .data_str("incident_key")
                .or(payload.unique_key.as_deref()),
            description: payload.text(),
            details: &payload.data,
            client: payload.data_str("client"),
            client_url: payload.data_str("client_url"),
        }
    }
}

#[async_trait]
impl Notifier for PagerDutyNotifier {
    fn receiver_type(&self) -> &str {
        Self::RECEIVER_TYPE
    }

    async fn prepare_config(&self, config: JsonMap) -> Result<JsonMap, SendError> {
        let config: PagerDutyConfig = decode_config(Self::RECEIVER_TYPE, &config)?;
        if config.service_key.trim().is_empty() {
            return Err(SendError::fatal("pagerduty service_key is empty"));
        }
        encode_config(Self::RECEIVER_TYPE, &config)
    }

    async fn send(&self, payload: &DeliveryPayload, config: &JsonMap) -> Result<(), SendError> {
        let config: PagerDutyConfig = decode_config(Self::RECEIVER_TYPE, config)?;

        let response = self
            .client
            .post(format!("{}{CREATE_EVENT_PATH}", self.api_host))
            .json(&Self::build_event(payload, &config.service_key))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if let Err(e) = classify_status(status, &body) {
            warn!(%status, "PagerDuty rejected event");
            return Err(e);
        }

        let reply: EventV1Response = serde_json::from_str(&body)
            .map_err(|e| SendError::fatal(format!("unexpected pagerduty response: {e}")))?;
        if reply.status != "success" {
            return Err(SendError::Fatal(format!(
                "pagerduty event not accepted: {} {}",
                reply.status, reply.message
            )));
        }

        debug!(notification_id = %payload.notification_id, "PagerDuty event created");
        Ok(())
    }
}
