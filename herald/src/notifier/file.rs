//! File receiver: appends one JSON line per delivery.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{DeliveryPayload, Notifier, SendError, decode_config, encode_config};
use crate::domain::JsonMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileConfig {
    /// Target file path.
    url: String,
}

impl FileConfig {
    /// The file name must carry exactly one extension, e.g. `alerts.log`.
    fn validate(&self) -> Result<(), SendError> {
        let file_name = Path::new(&self.url)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        if file_name.split('.').count() != 2
            || file_name.starts_with('.')
            || file_name.ends_with('.')
        {
            return Err(SendError::fatal(format!("invalid filename for \"{}\"", self.url)));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FileNotifier;

impl FileNotifier {
    pub const RECEIVER_TYPE: &'static str = "file";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    fn receiver_type(&self) -> &str {
        Self::RECEIVER_TYPE
    }

    async fn prepare_config(&self, config: JsonMap) -> Result<JsonMap, SendError> {
        let config: FileConfig = decode_config(Self::RECEIVER_TYPE, &config)?;
        config.validate()?;
        encode_config(Self::RECEIVER_TYPE, &config)
    }

    async fn send(&self, payload: &DeliveryPayload, config: &JsonMap) -> Result<(), SendError> {
        let config: FileConfig = decode_config(Self::RECEIVER_TYPE, config)?;
        config.validate()?;

        let mut line = serde_json::to_vec(payload)
            .map_err(|e| SendError::fatal(format!("unserializable payload: {e}")))?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.url)
            .await
            .map_err(|e| SendError::fatal(format!("failed to open {}: {e}", config.url)))?;
        file.write_all(&line)
            .await
            .map_err(|e| SendError::fatal(format!("failed to write {}: {e}", config.url)))?;
        file.flush()
            .await
            .map_err(|e| SendError::fatal(format!("failed to flush {}: {e}", config.url)))?;

        debug!(
            path = %config.url,
            notification_id = %payload.notification_id,
            "Appended notification"
        );
        Ok(())
    }
}
