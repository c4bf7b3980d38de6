//! # tapline-publish — sink fan-out for tapline
//!
//! Takes the [`ChangeRecord`](tapline_cdc::ChangeRecord) stream produced by
//! a source and fans it out to a dynamic set of sinks:
//!
//! - every sink owns a bounded queue drained by its own worker task
//! - the producer never blocks: a full queue drops the event and counts it
//! - per-sink delivery is FIFO; across sinks no ordering is promised
//! - one slow or failing sink never stalls another sink or the decoder
//!
//! ```text
//! ChangeRecord ─▶ Dispatcher ─┬─▶ [queue] ─▶ worker ─▶ file sink
//!                             ├─▶ [queue] ─▶ worker ─▶ webhook sink
//!                             └─▶ [queue] ─▶ worker ─▶ …
//! ```

pub mod dispatcher;
pub mod event;
pub mod registry;
pub mod sink;
pub mod sinks;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use event::PublishedEvent;
pub use registry::SinkRegistry;
pub use sink::{Sink, SinkConfig, SinkError, SinkMetadata, DEFAULT_QUEUE_DEPTH};
pub use worker::{SinkHandle, SinkState, SinkStats};
