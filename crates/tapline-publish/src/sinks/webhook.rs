//! Webhook sink: POSTs each event document to an HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::event::PublishedEvent;
use crate::sink::{Sink, SinkConfig, SinkError, SinkMetadata};

const DEFAULT_TIMEOUT_MS: i64 = 5_000;

pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    /// Options: `url` (required), `timeout_ms` (default 5000).
    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        let url = config
            .opt_str("url")
            .ok_or_else(|| SinkError::InvalidArgument("webhook sink needs a `url` option".into()))?
            .to_string();
        let timeout_ms = config.opt_i64("timeout_ms", DEFAULT_TIMEOUT_MS).max(1) as u64;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| SinkError::Other(e.to_string()))?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn metadata(&self) -> SinkMetadata {
        SinkMetadata {
            name: "webhook",
            version: "1.0",
        }
    }

    async fn start(&mut self) -> Result<(), SinkError> {
        info!(url = %self.url, "webhook sink ready");
        Ok(())
    }

    async fn publish(&mut self, event: &PublishedEvent) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .body(event.json.clone())
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SinkError::Unavailable(format!(
                "endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_url() {
        assert!(matches!(
            WebhookSink::from_config(&SinkConfig::new("webhook")),
            Err(SinkError::InvalidArgument(_))
        ));
        assert!(WebhookSink::from_config(
            &SinkConfig::new("webhook").with_option("url", "http://localhost:9999/events")
        )
        .is_ok());
    }
}
