//! Generic HTTP receiver (`http`): JSON POST of the delivery payload.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    DeliveryPayload, Notifier, SendError, classify_status, classify_transport, decode_config,
    encode_config,
};
use crate::domain::JsonMap;

/// Configuration of an `http` receiver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Extra request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<WebhookAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    Bearer { token: String },
    Basic { username: String, password: String },
    Header { name: String, value: String },
}

impl WebhookConfig {
    fn validate(&self) -> Result<(), SendError> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| {
                SendError::fatal(format!("invalid http receiver url '{}': {e}", self.url))
            })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SendError::fatal(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }

    fn build_headers(&self) -> Result<HeaderMap, SendError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            insert_header(&mut headers, name, value)?;
        }

        match &self.auth {
            Some(WebhookAuth::Bearer { token }) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| SendError::fatal(format!("invalid bearer token: {e}")))?;
                headers.insert(AUTHORIZATION, value);
            }
            Some(WebhookAuth::Header { name, value }) => insert_header(&mut headers, name, value)?,
            // Applied on the request builder.
            Some(WebhookAuth::Basic { .. }) | None => {}
        }

        Ok(headers)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), SendError> {
    let name = name
        .parse::<HeaderName>()
        .map_err(|e| SendError::fatal(format!("invalid header name '{name}': {e}")))?;
    let value = value
        .parse::<HeaderValue>()
        .map_err(|e| SendError::fatal(format!("invalid header value for '{name}': {e}")))?;
    headers.insert(name, value);
    Ok(())
}

pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub const RECEIVER_TYPE: &'static str = "http";

    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn receiver_type(&self) -> &str {
        Self::RECEIVER_TYPE
    }

    async fn prepare_config(&self, config: JsonMap) -> Result<JsonMap, SendError> {
        let config: WebhookConfig = decode_config(Self::RECEIVER_TYPE, &config)?;
        config.validate()?;
        config.build_headers()?;
        encode_config(Self::RECEIVER_TYPE, &config)
    }

    async fn send(&self, payload: &DeliveryPayload, config: &JsonMap) -> Result<(), SendError> {
        let config: WebhookConfig = decode_config(Self::RECEIVER_TYPE, config)?;

        let mut request = self
            .client
            .post(&config.url)
            .headers(config.build_headers()?)
            .json(payload);
        if let Some(WebhookAuth::Basic { username, password }) = &config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %config.url, %status, "HTTP receiver rejected notification");
            return classify_status(status, &body);
        }

        debug!(
            url = %config.url,
            notification_id = %payload.notification_id,
            "HTTP receiver notified"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_client() -> Client {
        crate::notifier::http_client(std::time::Duration::from_secs(5))
    }

    fn map(value: serde_json::Value) -> JsonMap {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_prepare_config_rejects_bad_url() {
        let notifier = WebhookNotifier::new(test_client());

        let err = notifier
            .prepare_config(map(json!({ "url": "not a url" })))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());

        let err = notifier
            .prepare_config(map(json!({ "url": "ftp://example.com" })))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());

        assert!(notifier.prepare_config(map(json!({}))).await.is_err());
    }

    #[tokio::test]
    async fn test_prepare_config_keeps_headers() {
        let notifier = WebhookNotifier::new(test_client());
        let prepared = notifier
            .prepare_config(map(json!({
                "url": "https://example.com/hook",
                "headers": { "x-team": "x" },
                "auth": { "type": "bearer", "token": "t" }
            })))
            .await
            .unwrap();
        assert_eq!(prepared["headers"]["x-team"], "x");
        assert_eq!(prepared["auth"]["type"], "bearer");
    }

    #[test]
    fn test_build_headers_with_bearer() {
        let config = WebhookConfig {
            url: "https://example.com/webhook".to_string(),
            auth: Some(WebhookAuth::Bearer {
                token: "test-token".to_string(),
            }),
            ..Default::default()
        };
        let headers = config.build_headers().unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer test-token");
    }

    #[test]
    fn test_invalid_header_is_fatal() {
        let config = WebhookConfig {
            url: "https://example.com/webhook".to_string(),
            headers: BTreeMap::from([("bad header".to_string(), "v".to_string())]),
            auth: None,
        };
        assert!(!config.build_headers().unwrap_err().is_retryable());
    }
}
