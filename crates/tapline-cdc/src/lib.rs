//! # tapline-cdc — change data capture sources for tapline
//!
//! Decodes a relational database's native replication stream into logical
//! row events and hands them to the publishing plane.
//!
//! Two source dialects are supported:
//!
//! - `mysql` — MySQL/MariaDB row-based binlog replication, including the
//!   MariaDB zlib-compressed row events
//! - `postgres` — PostgreSQL logical replication carrying the `pgoutput`
//!   wire format
//!
//! Both sources emit [`ChangeRecord`]s through a bounded channel, restore
//! their position from a [`checkpoint file`](common::checkpoint) at startup
//! and record progress as they decode.
//!
//! ```text
//! MySQL binlog ──┐
//!                ├─▶ decoder ─▶ capture filter ─▶ ChangeRecord ─▶ mpsc
//! Postgres WAL ──┘
//! ```

pub mod common;
pub mod mysql;
pub mod postgres;

pub use common::{
    CaptureColumns, CapturePolicy, CdcError, ChangeRecord, CheckpointFile, CheckpointPolicy,
    DatabaseCapture, Lsn, RecordKind, Result, RowImage, SourcePosition, TableCapture,
    TableProjection,
};
