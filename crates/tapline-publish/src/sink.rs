//! The sink contract
//!
//! Sinks are statically composed: the registry constructs them from the
//! config's sink name plus a string option map, so the set of kinds is a
//! compile-time matter while each instance stays fully config-driven.
//!
//! A sink goes through `start → publish… → stop`; construction is the
//! `init` step and `Drop` is the cleanup hook. Errors are classified by
//! kind so the worker can count and log them consistently.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::PublishedEvent;

/// Default bound of a sink's queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Sink failure kinds.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Bad or missing configuration for this sink.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The sink has not been started or lost its connection.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The downstream system rejected or cannot take the event.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Static sink identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkMetadata {
    pub name: &'static str,
    pub version: &'static str,
}

/// A destination for published events.
///
/// `publish` must not retry internally on behalf of the pipeline — the
/// worker counts the error and moves on; retrying is the sink's own
/// business if it wants it.
#[async_trait]
pub trait Sink: Send {
    /// Identify this sink implementation.
    fn metadata(&self) -> SinkMetadata;

    /// Bring up connections or open files. Called once before the first
    /// `publish`.
    async fn start(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Deliver one event.
    async fn publish(&mut self, event: &PublishedEvent) -> Result<(), SinkError>;

    /// Deliver a batch; the default forwards one by one.
    async fn publish_batch(&mut self, events: &[PublishedEvent]) -> Result<(), SinkError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    /// Tear down. Called after the worker drained the queue.
    async fn stop(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Liveness hint for diagnostics.
    async fn health(&self) -> bool {
        true
    }
}

/// Configuration of one sink instance.
#[derive(Debug, Clone, Default)]
pub struct SinkConfig {
    /// Sink kind and instance name (`file`, `console`, `webhook`, …).
    pub name: String,
    /// Recorded for config compatibility; resolution is by `name`.
    pub library_path: Option<String>,
    pub active: bool,
    /// Schema allow-list; empty means every schema.
    pub schemas: Vec<String>,
    pub max_queue_depth: usize,
    /// Sink-specific options.
    pub options: HashMap<String, String>,
}

impl SinkConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            max_queue_depth: DEFAULT_QUEUE_DEPTH,
            ..Default::default()
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Look up an option by key.
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|s| s.as_str())
    }

    /// Integer option with a default.
    pub fn opt_i64(&self, key: &str, default: i64) -> i64 {
        self.opt_str(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Boolean option with a default. Accepts 1/0, true/false, yes/no,
    /// on/off in any case.
    pub fn opt_bool(&self, key: &str, default: bool) -> bool {
        match self.opt_str(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if ["1", "true", "yes", "on"].contains(&v.as_str()) => true,
            Some(v) if ["0", "false", "no", "off"].contains(&v.as_str()) => false,
            _ => default,
        }
    }

    /// The effective queue bound.
    pub fn queue_depth(&self) -> usize {
        if self.max_queue_depth == 0 {
            DEFAULT_QUEUE_DEPTH
        } else {
            self.max_queue_depth
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_option_getters() {
        let config = SinkConfig::new("file")
            .with_option("path", "/tmp/out.jsonl")
            .with_option("flush_every", "16")
            .with_option("append", "Yes")
            .with_option("verbose", "off");

        assert_eq!(config.opt_str("path"), Some("/tmp/out.jsonl"));
        assert_eq!(config.opt_str("missing"), None);
        assert_eq!(config.opt_i64("flush_every", 1), 16);
        assert_eq!(config.opt_i64("missing", 7), 7);
        assert!(config.opt_bool("append", false));
        assert!(!config.opt_bool("verbose", true));
        assert!(config.opt_bool("missing", true));
    }

    #[test]
    fn test_queue_depth_default() {
        let mut config = SinkConfig::new("console");
        assert_eq!(config.queue_depth(), DEFAULT_QUEUE_DEPTH);
        config.max_queue_depth = 4;
        assert_eq!(config.queue_depth(), 4);
    }
}
