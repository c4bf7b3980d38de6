//! Event dispatch
//!
//! Matches each change record against every sink's schema filter and
//! enqueues a deep-owned copy per matching sink. Filtering happens before
//! the copy so events no sink wants are never materialized for the queue.

use std::sync::Arc;

use tracing::trace;

use tapline_cdc::ChangeRecord;

use crate::event::PublishedEvent;
use crate::worker::SinkHandle;

/// Fans change records out to the registered sinks.
pub struct Dispatcher {
    sinks: Vec<Arc<SinkHandle>>,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Arc<SinkHandle>>) -> Self {
        Self { sinks }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Dispatch one record. Never blocks; every matching sink gets its own
    /// owned copy, full queues drop.
    pub fn dispatch(&self, record: &ChangeRecord) {
        let mut matching = self
            .sinks
            .iter()
            .filter(|sink| sink.should_publish(&record.database))
            .peekable();

        if matching.peek().is_none() {
            return;
        }

        let event = PublishedEvent::from_record(record);
        let mut dispatched = 0usize;
        for sink in matching {
            sink.enqueue(event.clone());
            dispatched += 1;
        }
        trace!(
            txn = %event.txn,
            database = %event.database,
            table = %event.table,
            sinks = dispatched,
            "event dispatched"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Sink, SinkConfig, SinkError, SinkMetadata};
    use crate::sinks::memory::MemorySink;
    use async_trait::async_trait;
    use tapline_cdc::{RecordKind, SourcePosition};

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        fn metadata(&self) -> SinkMetadata {
            SinkMetadata {
                name: "failing",
                version: "0",
            }
        }
        async fn publish(&mut self, _event: &PublishedEvent) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("down".into()))
        }
    }

    fn record(database: &str) -> ChangeRecord {
        ChangeRecord {
            kind: RecordKind::Insert,
            txn: "t".into(),
            database: database.into(),
            table: "users".into(),
            primary_key: vec![],
            rows: vec![],
            query: None,
            xid: None,
            position: SourcePosition::MySql {
                file: "mysql-bin.000001".into(),
                offset: 4,
            },
        }
    }

    #[tokio::test]
    async fn test_schema_filter_decides_enqueue() {
        let (sink_a, delivered_a) = MemorySink::new();
        let mut config_a = SinkConfig::new("a");
        config_a.schemas = vec!["sales".into()];
        let handle_a = Arc::new(SinkHandle::load(Box::new(sink_a), &config_a));

        let (sink_b, delivered_b) = MemorySink::new();
        let handle_b = Arc::new(SinkHandle::load(Box::new(sink_b), &SinkConfig::new("b")));

        handle_a.start().await.unwrap();
        handle_b.start().await.unwrap();

        let dispatcher = Dispatcher::new(vec![handle_a.clone(), handle_b.clone()]);
        dispatcher.dispatch(&record("sales"));
        dispatcher.dispatch(&record("hr"));

        handle_a.stop().await;
        handle_b.stop().await;

        // Sink A only sees its schema; sink B (empty list) sees all.
        assert_eq!(delivered_a.lock().await.len(), 1);
        assert_eq!(delivered_b.lock().await.len(), 2);
        // Filtered-out events are not drops.
        assert_eq!(handle_a.stats().dropped, 0);
    }

    #[tokio::test]
    async fn test_publish_errors_are_counted_not_fatal() {
        let handle = Arc::new(SinkHandle::load(
            Box::new(FailingSink),
            &SinkConfig::new("failing"),
        ));
        handle.start().await.unwrap();

        let dispatcher = Dispatcher::new(vec![handle.clone()]);
        for _ in 0..3 {
            dispatcher.dispatch(&record("db"));
        }

        handle.stop().await;
        let stats = handle.stats();
        assert_eq!(stats.errors, 3);
        assert_eq!(stats.published, 0);
    }
}
