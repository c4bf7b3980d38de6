//! Console sink: writes each event document to stdout.

use async_trait::async_trait;
use tokio::io::{stdout, AsyncWriteExt, Stdout};

use crate::event::PublishedEvent;
use crate::sink::{Sink, SinkError, SinkMetadata};

pub struct ConsoleSink {
    out: Stdout,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self { out: stdout() }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn metadata(&self) -> SinkMetadata {
        SinkMetadata {
            name: "console",
            version: "1.0",
        }
    }

    async fn publish(&mut self, event: &PublishedEvent) -> Result<(), SinkError> {
        self.out.write_all(event.json.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(())
    }
}
