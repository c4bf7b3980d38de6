//! File sink: appends one JSON document per line.

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::event::PublishedEvent;
use crate::sink::{Sink, SinkConfig, SinkError, SinkMetadata};

pub struct FileSink {
    path: String,
    file: Option<File>,
}

impl FileSink {
    /// Options: `path` (required) — the JSON-lines output file.
    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        let path = config
            .opt_str("path")
            .ok_or_else(|| SinkError::InvalidArgument("file sink needs a `path` option".into()))?
            .to_string();
        Ok(Self { path, file: None })
    }
}

#[async_trait]
impl Sink for FileSink {
    fn metadata(&self) -> SinkMetadata {
        SinkMetadata {
            name: "file",
            version: "1.0",
        }
    }

    async fn start(&mut self) -> Result<(), SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        info!(path = %self.path, "file sink opened");
        self.file = Some(file);
        Ok(())
    }

    async fn publish(&mut self, event: &PublishedEvent) -> Result<(), SinkError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SinkError::NotConnected("file sink not started".into()))?;
        file.write_all(event.json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SinkError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }
}
