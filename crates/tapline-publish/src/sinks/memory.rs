//! In-memory sink for tests and development.
//!
//! Records every delivered event behind a shared lock so tests can assert
//! on delivery order and content after the worker drained its queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::event::PublishedEvent;
use crate::sink::{Sink, SinkError, SinkMetadata};

/// Shared view of the delivered events.
pub type DeliveredEvents = Arc<Mutex<Vec<PublishedEvent>>>;

pub struct MemorySink {
    delivered: DeliveredEvents,
}

impl MemorySink {
    /// Create a sink plus the shared handle to its deliveries.
    pub fn new() -> (Self, DeliveredEvents) {
        let delivered: DeliveredEvents = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                delivered: Arc::clone(&delivered),
            },
            delivered,
        )
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn metadata(&self) -> SinkMetadata {
        SinkMetadata {
            name: "memory",
            version: "1.0",
        }
    }

    async fn publish(&mut self, event: &PublishedEvent) -> Result<(), SinkError> {
        self.delivered.lock().await.push(event.clone());
        Ok(())
    }
}
