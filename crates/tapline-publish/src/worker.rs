//! Per-sink queue and worker
//!
//! Every sink instance owns one bounded queue and one worker task.
//! [`SinkHandle::enqueue`] never blocks: a full queue drops the event,
//! bumps the drop counter and logs a warning — the single backpressure
//! knob is the queue depth. The worker dequeues in FIFO order and calls
//! the sink's `publish`; publish failures are counted, never retried here.
//!
//! Lifecycle: `Loaded → Started → Stopped`. Events may be enqueued while
//! merely loaded (they wait for the worker); `stop` signals the worker,
//! drains what is left, joins the task and then calls the sink's own stop
//! hook. `stop` is idempotent.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::PublishedEvent;
use crate::sink::{Sink, SinkConfig};

/// Sink lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SinkState {
    Loaded = 0,
    Started = 1,
    Stopped = 2,
}

impl SinkState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SinkState::Loaded,
            1 => SinkState::Started,
            _ => SinkState::Stopped,
        }
    }
}

/// Counter snapshot for one sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub published: u64,
    pub dropped: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

struct Inner {
    sink: Option<Box<dyn Sink>>,
    queue_rx: Option<mpsc::Receiver<PublishedEvent>>,
    worker: Option<JoinHandle<()>>,
}

/// Handle to one sink instance: the dispatcher enqueues through it, the
/// registry drives its lifecycle.
pub struct SinkHandle {
    name: String,
    schemas: Vec<String>,
    queue_tx: mpsc::Sender<PublishedEvent>,
    state: AtomicU8,
    stop_tx: watch::Sender<bool>,
    counters: Arc<Counters>,
    inner: Mutex<Inner>,
}

impl SinkHandle {
    /// Wrap a constructed sink. The handle starts in `Loaded`.
    pub fn load(sink: Box<dyn Sink>, config: &SinkConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_depth());
        let (stop_tx, _stop_rx) = watch::channel(false);

        info!(
            sink = %config.name,
            queue_depth = config.queue_depth(),
            schemas = config.schemas.len(),
            "sink loaded"
        );

        Self {
            name: config.name.clone(),
            schemas: config.schemas.clone(),
            queue_tx,
            state: AtomicU8::new(SinkState::Loaded as u8),
            stop_tx,
            counters: Arc::new(Counters::default()),
            inner: Mutex::new(Inner {
                sink: Some(sink),
                queue_rx: Some(queue_rx),
                worker: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SinkState {
        SinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Whether an event for `schema` belongs to this sink. An empty
    /// allow-list means every schema.
    pub fn should_publish(&self, schema: &str) -> bool {
        self.schemas.is_empty() || self.schemas.iter().any(|s| s == schema)
    }

    /// Non-blocking enqueue of an owned event.
    ///
    /// Returns in bounded time regardless of the worker's speed: a full
    /// queue (or a stopped sink) drops the event and counts the drop.
    pub fn enqueue(&self, event: PublishedEvent) {
        if self.state() == SinkState::Stopped {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.queue_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sink = %self.name, "queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Start the worker task. Idempotent while started.
    pub async fn start(&self) -> Result<(), crate::sink::SinkError> {
        let mut inner = self.inner.lock().await;
        match self.state() {
            SinkState::Started => return Ok(()),
            SinkState::Stopped => {
                return Err(crate::sink::SinkError::NotConnected(format!(
                    "sink {} already stopped",
                    self.name
                )))
            }
            SinkState::Loaded => {}
        }

        let mut sink = inner
            .sink
            .take()
            .ok_or_else(|| crate::sink::SinkError::NotConnected("sink already taken".into()))?;
        let mut queue_rx = inner
            .queue_rx
            .take()
            .ok_or_else(|| crate::sink::SinkError::NotConnected("queue already taken".into()))?;

        if let Err(e) = sink.start().await {
            // Put the pieces back so a later start can retry.
            inner.sink = Some(sink);
            inner.queue_rx = Some(queue_rx);
            return Err(e);
        }

        let name = self.name.clone();
        let counters = Arc::clone(&self.counters);
        let mut stop_rx = self.stop_tx.subscribe();

        let worker = tokio::spawn(async move {
            info!(sink = %name, "sink worker started");
            loop {
                tokio::select! {
                    maybe = queue_rx.recv() => match maybe {
                        Some(event) => deliver(sink.as_mut(), &name, &counters, event).await,
                        None => break,
                    },
                    _ = stop_rx.changed() => {
                        // Stop requested: drain what is queued, then exit.
                        while let Ok(event) = queue_rx.try_recv() {
                            deliver(sink.as_mut(), &name, &counters, event).await;
                        }
                        break;
                    }
                }
            }
            if let Err(e) = sink.stop().await {
                warn!(sink = %name, error = %e, "sink stop hook failed");
            }
            info!(sink = %name, "sink worker exiting");
        });

        inner.worker = Some(worker);
        self.state.store(SinkState::Started as u8, Ordering::SeqCst);
        info!(sink = %self.name, "sink started");
        Ok(())
    }

    /// Signal the worker, join it and retire the sink. Idempotent.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if self.state() != SinkState::Started {
            self.state.store(SinkState::Stopped as u8, Ordering::SeqCst);
            return;
        }
        self.state.store(SinkState::Stopped as u8, Ordering::SeqCst);

        let _ = self.stop_tx.send(true);
        if let Some(worker) = inner.worker.take() {
            if let Err(e) = worker.await {
                warn!(sink = %self.name, error = %e, "sink worker panicked");
            }
        }

        let stats = self.stats();
        info!(
            sink = %self.name,
            published = stats.published,
            dropped = stats.dropped,
            errors = stats.errors,
            "sink stopped"
        );
    }
}

async fn deliver(
    sink: &mut dyn Sink,
    name: &str,
    counters: &Counters,
    event: PublishedEvent,
) {
    match sink.publish(&event).await {
        Ok(()) => {
            counters.published.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(sink = %name, error = %e, "publish failed");
        }
    }
    debug!(sink = %name, txn = %event.txn, "event delivered");
}
