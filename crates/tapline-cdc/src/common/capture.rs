//! Capture policy and column projection
//!
//! The policy answers, for every raw row: should it be emitted, and which
//! columns of it. A table absent from the policy produces no events; a
//! column outside a table's allow-list is byte-skipped by the decoders,
//! never materialized.
//!
//! A [`TableProjection`] is the policy resolved against the current relation
//! descriptor: indices into the wire-order column array plus the names to
//! emit. It is recomputed whenever the source announces the table again.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Column selection for one captured table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureColumns {
    /// `["*"]` in the config: every wire column.
    All,
    /// An explicit ordered allow-list of column names.
    Named(Vec<String>),
}

impl Default for CaptureColumns {
    fn default() -> Self {
        CaptureColumns::All
    }
}

/// One captured table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableCapture {
    pub name: String,
    /// Declared primary key column names; overrides whatever the source
    /// reports.
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub columns: CaptureColumns,
}

/// One captured database (MySQL) or schema (Postgres).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCapture {
    pub name: String,
    #[serde(default = "default_true")]
    pub capture_dml: bool,
    #[serde(default = "default_true")]
    pub capture_ddl: bool,
    #[serde(default)]
    pub tables: Vec<TableCapture>,
}

fn default_true() -> bool {
    true
}

/// The complete capture configuration of one source connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapturePolicy {
    pub databases: Vec<DatabaseCapture>,
}

impl CapturePolicy {
    pub fn database(&self, name: &str) -> Option<&DatabaseCapture> {
        self.databases.iter().find(|d| d.name == name)
    }

    pub fn table(&self, database: &str, table: &str) -> Option<&TableCapture> {
        self.database(database)
            .and_then(|d| d.tables.iter().find(|t| t.name == table))
    }

    pub fn captures_table(&self, database: &str, table: &str) -> bool {
        self.table(database, table).is_some()
    }

    pub fn captures_dml(&self, database: &str) -> bool {
        self.database(database).map(|d| d.capture_dml).unwrap_or(false)
    }

    pub fn captures_ddl(&self, database: &str) -> bool {
        self.database(database).map(|d| d.capture_ddl).unwrap_or(false)
    }

    /// Log the configured capture set, one line per database and table.
    pub fn log_summary(&self) {
        for db in &self.databases {
            info!(
                database = %db.name,
                dml = db.capture_dml,
                ddl = db.capture_ddl,
                tables = db.tables.len(),
                "capture configuration"
            );
            for table in &db.tables {
                match &table.columns {
                    CaptureColumns::All => {
                        info!("  {}.{}: all columns", db.name, table.name)
                    }
                    CaptureColumns::Named(cols) => {
                        info!("  {}.{}: {} columns", db.name, table.name, cols.len())
                    }
                }
            }
        }
    }
}

/// One emitted column: its index in the wire-order column array and the
/// name it is emitted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedColumn {
    pub index: usize,
    pub name: String,
}

/// The capture policy resolved against a relation descriptor.
#[derive(Debug, Clone, Default)]
pub struct TableProjection {
    pub primary_key: Vec<String>,
    /// Emitted columns in wire order.
    pub columns: Vec<ProjectedColumn>,
}

impl TableProjection {
    /// Whether the wire column at `index` is emitted.
    pub fn contains(&self, index: usize) -> bool {
        self.columns.iter().any(|c| c.index == index)
    }

    /// Name for the wire column at `index`, if projected.
    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.index == index)
            .map(|c| c.name.as_str())
    }

    /// Indices of the projected columns, ascending.
    pub fn indices(&self) -> Vec<usize> {
        self.columns.iter().map(|c| c.index).collect()
    }
}

impl TableCapture {
    /// Resolve this capture entry against the wire-order column names of the
    /// relation descriptor.
    ///
    /// With a wildcard selection every wire column is projected; columns
    /// whose name is unknown fall back to a positional `col<N>` name. With
    /// an explicit allow-list each configured name is looked up in the
    /// descriptor; names that do not resolve are dropped with a warning.
    pub fn resolve(&self, wire_columns: &[String]) -> TableProjection {
        let columns = match &self.columns {
            CaptureColumns::All => wire_columns
                .iter()
                .enumerate()
                .map(|(index, name)| ProjectedColumn {
                    index,
                    name: if name.is_empty() {
                        format!("col{index}")
                    } else {
                        name.clone()
                    },
                })
                .collect(),
            CaptureColumns::Named(names) => {
                let mut projected = Vec::with_capacity(names.len());
                for name in names {
                    match wire_columns.iter().position(|c| c == name) {
                        Some(index) => projected.push(ProjectedColumn {
                            index,
                            name: name.clone(),
                        }),
                        None => {
                            warn!(column = %name, table = %self.name, "configured column not found")
                        }
                    }
                }
                projected.sort_by_key(|c| c.index);
                projected
            }
        };

        TableProjection {
            primary_key: self.primary_key.clone(),
            columns,
        }
    }

    /// Resolve with no column names available (schema side channel failed):
    /// a wildcard selection degrades to positional names, an allow-list
    /// projects nothing.
    pub fn resolve_positional(&self, column_count: usize) -> TableProjection {
        let names: Vec<String> = (0..column_count).map(|_| String::new()).collect();
        self.resolve(&names)
    }
}
