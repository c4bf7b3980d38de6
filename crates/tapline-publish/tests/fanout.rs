//! Fan-out behavior: per-sink ordering, deep-copy isolation, non-blocking
//! dispatch with drop accounting, and slow-sink isolation. No database
//! involved — records are fed straight into the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use tapline_cdc::{ChangeRecord, RecordKind, RowImage, SourcePosition};
use tapline_publish::sinks::memory::{DeliveredEvents, MemorySink};
use tapline_publish::{
    Dispatcher, PublishedEvent, Sink, SinkConfig, SinkError, SinkHandle, SinkMetadata,
};

/// A sink whose `publish` parks until released, holding one in-flight event.
struct BlockedSink {
    release: Arc<Notify>,
    delivered: DeliveredEvents,
}

#[async_trait]
impl Sink for BlockedSink {
    fn metadata(&self) -> SinkMetadata {
        SinkMetadata {
            name: "blocked",
            version: "0",
        }
    }

    async fn publish(&mut self, event: &PublishedEvent) -> Result<(), SinkError> {
        self.release.notified().await;
        self.delivered.lock().await.push(event.clone());
        Ok(())
    }
}

fn record(database: &str, sequence: i64) -> ChangeRecord {
    let mut row = serde_json::Map::new();
    row.insert("seq".into(), serde_json::Value::from(sequence));
    ChangeRecord {
        kind: RecordKind::Insert,
        txn: format!("txn-{sequence}"),
        database: database.into(),
        table: "users".into(),
        primary_key: vec!["seq".into()],
        rows: vec![RowImage::Values(row)],
        query: None,
        xid: None,
        position: SourcePosition::MySql {
            file: "mysql-bin.000001".into(),
            offset: sequence as u64,
        },
    }
}

fn memory_handle(name: &str, depth: usize) -> (Arc<SinkHandle>, DeliveredEvents) {
    let (sink, delivered) = MemorySink::new();
    let mut config = SinkConfig::new(name);
    config.max_queue_depth = depth;
    (
        Arc::new(SinkHandle::load(Box::new(sink), &config)),
        delivered,
    )
}

#[tokio::test]
async fn per_sink_delivery_is_fifo() {
    let (handle, delivered) = memory_handle("ordered", 1024);
    handle.start().await.unwrap();

    let dispatcher = Dispatcher::new(vec![handle.clone()]);
    for i in 0..100 {
        dispatcher.dispatch(&record("testdb", i));
    }
    handle.stop().await;

    let events = delivered.lock().await;
    assert_eq!(events.len(), 100);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.txn, format!("txn-{i}"));
        assert_eq!(event.position, i as u64);
    }
}

#[tokio::test]
async fn slow_sink_does_not_stall_fast_sink_or_producer() {
    // Sink A drains freely; sink B blocks inside publish with a depth of 4.
    let (fast, fast_delivered) = memory_handle("fast", 1024);

    let release = Arc::new(Notify::new());
    let blocked_delivered: DeliveredEvents = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let mut blocked_config = SinkConfig::new("blocked");
    blocked_config.max_queue_depth = 4;
    let blocked = Arc::new(SinkHandle::load(
        Box::new(BlockedSink {
            release: Arc::clone(&release),
            delivered: Arc::clone(&blocked_delivered),
        }),
        &blocked_config,
    ));

    fast.start().await.unwrap();
    blocked.start().await.unwrap();
    // Let the blocked worker pull its first event into publish.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let dispatcher = Dispatcher::new(vec![fast.clone(), blocked.clone()]);
    let started = Instant::now();
    for i in 0..100 {
        dispatcher.dispatch(&record("testdb", i));
    }
    // Producer-side dispatch must not have waited on the blocked sink.
    assert!(started.elapsed() < Duration::from_secs(1));

    fast.stop().await;
    let fast_events = fast_delivered.lock().await;
    assert_eq!(fast_events.len(), 100);
    for (i, event) in fast_events.iter().enumerate() {
        assert_eq!(event.position, i as u64);
    }
    drop(fast_events);

    // The blocked sink held at most one in-flight event plus four queued;
    // everything else was dropped and counted.
    let stats = blocked.stats();
    assert!(stats.dropped >= 95, "dropped = {}", stats.dropped);

    // Release and drain: a background releaser keeps granting permits so
    // the worker can finish the in-flight and queued publishes.
    let releaser = {
        let release = Arc::clone(&release);
        tokio::spawn(async move {
            loop {
                release.notify_one();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    blocked.stop().await;
    releaser.abort();

    let delivered = blocked_delivered.lock().await.len() as u64;
    assert_eq!(delivered + blocked.stats().dropped, 100);
}

#[tokio::test]
async fn queue_full_drops_are_counted_exactly() {
    // Worker not started: the queue fills to its bound of 4, the other 96
    // enqueues drop.
    let (handle, delivered) = memory_handle("bounded", 4);
    let dispatcher = Dispatcher::new(vec![handle.clone()]);

    for i in 0..100 {
        dispatcher.dispatch(&record("testdb", i));
    }
    assert_eq!(handle.stats().dropped, 96);

    // Starting the worker drains the four queued events in order.
    handle.start().await.unwrap();
    handle.stop().await;

    let events = delivered.lock().await;
    assert_eq!(events.len(), 4);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.position, i as u64);
    }
    assert_eq!(handle.stats().published, 4);
    assert_eq!(handle.stats().dropped, 96);
}

#[tokio::test]
async fn filtered_schema_is_never_enqueued() {
    let (sink, delivered) = MemorySink::new();
    let mut config = SinkConfig::new("sales-only");
    config.schemas = vec!["sales".into()];
    let handle = Arc::new(SinkHandle::load(Box::new(sink), &config));
    handle.start().await.unwrap();

    let dispatcher = Dispatcher::new(vec![handle.clone()]);
    dispatcher.dispatch(&record("hr", 1));
    dispatcher.dispatch(&record("sales", 2));
    dispatcher.dispatch(&record("hr", 3));
    handle.stop().await;

    let events = delivered.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].database, "sales");
    // A filtered event is neither published nor dropped.
    assert_eq!(handle.stats().dropped, 0);
    assert_eq!(handle.stats().published, 1);
}

#[tokio::test]
async fn enqueued_copies_are_independent_of_the_producer() {
    let (handle, delivered) = memory_handle("deep-copy", 16);
    handle.start().await.unwrap();
    let dispatcher = Dispatcher::new(vec![handle.clone()]);

    let mut producer_record = record("testdb", 42);
    dispatcher.dispatch(&producer_record);

    // Mutate and drop the producer's record after enqueue returns.
    producer_record.database = "mutated".into();
    producer_record.txn = "mutated".into();
    drop(producer_record);

    handle.stop().await;
    let events = delivered.lock().await;
    assert_eq!(events[0].database, "testdb");
    assert_eq!(events[0].txn, "txn-42");
    assert!(events[0].json.contains(r#""seq":42"#));
}

#[tokio::test]
async fn two_sinks_receive_their_own_copies() {
    let (a, delivered_a) = memory_handle("copy-a", 16);
    let (b, delivered_b) = memory_handle("copy-b", 16);
    a.start().await.unwrap();
    b.start().await.unwrap();

    let dispatcher = Dispatcher::new(vec![a.clone(), b.clone()]);
    dispatcher.dispatch(&record("testdb", 7));

    a.stop().await;
    b.stop().await;

    let events_a = delivered_a.lock().await;
    let events_b = delivered_b.lock().await;
    assert_eq!(events_a.len(), 1);
    assert_eq!(events_b.len(), 1);
    assert_eq!(events_a[0], events_b[0]);
}
