//! Sink registry
//!
//! Builds sink instances from their configs and drives their lifecycle as a
//! group. A sink that fails to build or start is logged and skipped — the
//! others still run.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::sink::{Sink, SinkConfig, SinkError};
use crate::sinks::console::ConsoleSink;
use crate::sinks::file::FileSink;
use crate::sinks::webhook::WebhookSink;
use crate::worker::SinkHandle;

/// Construct a sink from its config. Resolution is by sink name against
/// the built-in kinds.
fn build_sink(config: &SinkConfig) -> Result<Box<dyn Sink>, SinkError> {
    match config.name.as_str() {
        "file" | "file_publisher" => Ok(Box::new(FileSink::from_config(config)?)),
        "console" | "stdout" => Ok(Box::new(ConsoleSink::new())),
        "webhook" | "webhook_publisher" => Ok(Box::new(WebhookSink::from_config(config)?)),
        other => Err(SinkError::InvalidArgument(format!(
            "unknown sink kind: {other}"
        ))),
    }
}

/// Owns every configured sink instance.
pub struct SinkRegistry {
    sinks: Vec<Arc<SinkHandle>>,
}

impl SinkRegistry {
    /// Build all active sinks. Load failures skip the sink.
    pub fn from_configs(configs: &[SinkConfig]) -> Self {
        let mut sinks = Vec::new();
        for config in configs {
            if !config.active {
                info!(sink = %config.name, "sink inactive, skipping");
                continue;
            }
            match build_sink(config) {
                Ok(sink) => {
                    sinks.push(Arc::new(SinkHandle::load(sink, config)));
                }
                Err(e) => {
                    error!(sink = %config.name, error = %e, "failed to load sink");
                }
            }
        }
        Self { sinks }
    }

    /// Wrap pre-built handles; used by embedders and tests.
    pub fn from_handles(sinks: Vec<Arc<SinkHandle>>) -> Self {
        Self { sinks }
    }

    pub fn handles(&self) -> Vec<Arc<SinkHandle>> {
        self.sinks.clone()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Start every loaded sink. Start failures are logged and skipped.
    pub async fn start_all(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.start().await {
                warn!(sink = %sink.name(), error = %e, "failed to start sink");
            }
        }
    }

    /// Stop every sink, draining queues. Safe to call more than once.
    pub async fn stop_all(&self) {
        for sink in &self.sinks {
            sink.stop().await;
        }
    }
}
