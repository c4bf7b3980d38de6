//! Pieces shared by both source dialects: the error type, the canonical
//! change record, the capture policy and the checkpoint manager.

pub mod capture;
pub mod checkpoint;
pub mod error;
pub mod event;

pub use capture::{
    CaptureColumns, CapturePolicy, DatabaseCapture, TableCapture, TableProjection,
};
pub use checkpoint::{CheckpointFile, CheckpointPolicy, Lsn, SourcePosition};
pub use error::{CdcError, Result};
pub use event::{ChangeRecord, RecordKind, RowImage};

/// Timeout applied when establishing a source connection.
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Wake interval of the decode loops. The loops never block longer than
/// this, so a cancellation signal is observed within one wake.
pub const STREAM_WAKE_SECS: u64 = 1;
