//! The canonical change record
//!
//! Every decoded source event is shaped into a [`ChangeRecord`] and
//! serialized once into a single JSON object with a fixed key order:
//! `type`, `txn`, `db`|`schema`, `table`, `primary_key`, `rows` — plus
//! `query` for DDL and `xid` for commit markers. MySQL events carry a `db`
//! key, Postgres events a `schema` key.
//!
//! Strings are JSON-escaped by serde_json, which emits control bytes below
//! 0x20 as `\u00XX`; row objects keep wire column order.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::common::checkpoint::SourcePosition;

/// Ordered JSON object used for row images.
pub type JsonMap = Map<String, Value>;

/// Kind of a canonical event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Insert,
    Update,
    Delete,
    Ddl,
    Commit,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Insert => write!(f, "INSERT"),
            RecordKind::Update => write!(f, "UPDATE"),
            RecordKind::Delete => write!(f, "DELETE"),
            RecordKind::Ddl => write!(f, "DDL"),
            RecordKind::Commit => write!(f, "COMMIT"),
        }
    }
}

/// One row of a change record.
#[derive(Debug, Clone)]
pub enum RowImage {
    /// Full row values (INSERT and DELETE).
    Values(JsonMap),
    /// Before/after pair (UPDATE). `before` is absent when the source did
    /// not ship an old image.
    Diff {
        before: Option<JsonMap>,
        after: JsonMap,
    },
}

/// A logical row event after capture filtering, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub kind: RecordKind,
    /// Process-generated transaction id shared by every event of one
    /// source transaction.
    pub txn: String,
    /// Database (MySQL) or schema (Postgres) name.
    pub database: String,
    /// Table name; empty for DDL and commit markers.
    pub table: String,
    /// Declared primary key column names, possibly empty.
    pub primary_key: Vec<String>,
    pub rows: Vec<RowImage>,
    /// The statement text, for DDL records.
    pub query: Option<String>,
    /// The server transaction id, for commit markers.
    pub xid: Option<u64>,
    pub position: SourcePosition,
}

impl ChangeRecord {
    /// Mint a new transaction identifier.
    pub fn new_txn_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Serialize to the wire JSON document.
    pub fn to_json(&self) -> String {
        let mut doc = JsonMap::new();
        doc.insert("type".into(), Value::String(self.kind.to_string()));
        doc.insert("txn".into(), Value::String(self.txn.clone()));

        let db_key = match self.position {
            SourcePosition::MySql { .. } => "db",
            SourcePosition::Postgres { .. } => "schema",
        };
        doc.insert(db_key.into(), Value::String(self.database.clone()));

        match self.kind {
            RecordKind::Ddl => {
                doc.insert(
                    "query".into(),
                    Value::String(self.query.clone().unwrap_or_default()),
                );
            }
            RecordKind::Commit => {
                doc.insert("xid".into(), Value::from(self.xid.unwrap_or(0)));
            }
            _ => {
                doc.insert("table".into(), Value::String(self.table.clone()));
                if !self.primary_key.is_empty() {
                    doc.insert(
                        "primary_key".into(),
                        Value::Array(
                            self.primary_key
                                .iter()
                                .map(|k| Value::String(k.clone()))
                                .collect(),
                        ),
                    );
                }
                doc.insert(
                    "rows".into(),
                    Value::Array(self.rows.iter().map(row_to_value).collect()),
                );
            }
        }

        Value::Object(doc).to_string()
    }
}

fn row_to_value(row: &RowImage) -> Value {
    match row {
        RowImage::Values(map) => Value::Object(map.clone()),
        RowImage::Diff { before, after } => {
            let mut obj = JsonMap::new();
            if let Some(before) = before {
                obj.insert("before".into(), Value::Object(before.clone()));
            }
            obj.insert("after".into(), Value::Object(after.clone()));
            Value::Object(obj)
        }
    }
}
