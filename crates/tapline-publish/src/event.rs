//! The queue item handed to sinks
//!
//! A [`PublishedEvent`] is a deep-owned copy of a shaped change record: the
//! JSON document plus routing metadata, all strings owned. Once enqueued the
//! producer's memory can go away; the worker owns its copy until the sink's
//! `publish` returns.

use tapline_cdc::ChangeRecord;

/// One event as sinks see it.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    /// Database (MySQL) or schema (Postgres) the event belongs to.
    pub database: String,
    /// Table name; empty for DDL and commit markers.
    pub table: String,
    /// The serialized event document.
    pub json: String,
    /// Transaction id.
    pub txn: String,
    /// Numeric source position (binlog offset or LSN).
    pub position: u64,
    /// Binlog file name; empty for Postgres sources.
    pub source_file: String,
}

impl PublishedEvent {
    /// Shape a change record into its deep-owned published form.
    pub fn from_record(record: &ChangeRecord) -> Self {
        Self {
            database: record.database.clone(),
            table: record.table.clone(),
            json: record.to_json(),
            txn: record.txn.clone(),
            position: record.position.offset(),
            source_file: record.position.file().to_string(),
        }
    }
}
