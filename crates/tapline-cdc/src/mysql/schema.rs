//! Schema side channel for MySQL
//!
//! Binlog events carry no column names and no enum labels, only numeric
//! types. This module fills the gap over a second, regular connection:
//!
//! - column names per `(schema, table)` from INFORMATION_SCHEMA
//! - enum labels per `(schema, table, column)` parsed out of the
//!   `COLUMN_TYPE` definition
//! - binlog checksum detection and the master-position bootstrap
//!
//! Lookups are cached in [`SchemaCache`]; the cache for a table is dropped
//! whenever the source sees the table announced with a different column
//! set.

use std::collections::HashMap;

use mysql_async::prelude::Queryable;
use mysql_async::Row;
use tracing::{debug, warn};

use crate::common::{CdcError, Result};

/// Cached side-channel lookups for one source connection.
#[derive(Default)]
pub struct SchemaCache {
    /// (schema, table) -> column names in ordinal order
    tables: HashMap<(String, String), Vec<String>>,
    /// (schema, table, column) -> enum labels in definition order
    enums: HashMap<(String, String, String), Vec<String>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self, schema: &str, table: &str) -> Option<&Vec<String>> {
        self.tables.get(&(schema.to_string(), table.to_string()))
    }

    pub fn set_columns(&mut self, schema: &str, table: &str, columns: Vec<String>) {
        self.tables
            .insert((schema.to_string(), table.to_string()), columns);
    }

    pub fn enum_labels(&self, schema: &str, table: &str, column: &str) -> Option<&Vec<String>> {
        self.enums
            .get(&(schema.to_string(), table.to_string(), column.to_string()))
    }

    pub fn set_enum_labels(
        &mut self,
        schema: &str,
        table: &str,
        column: &str,
        labels: Vec<String>,
    ) {
        self.enums.insert(
            (schema.to_string(), table.to_string(), column.to_string()),
            labels,
        );
    }

    /// Drop everything cached for one table. Called when the source
    /// announces the table again with a different column set.
    pub fn invalidate_table(&mut self, schema: &str, table: &str) {
        self.tables
            .remove(&(schema.to_string(), table.to_string()));
        self.enums
            .retain(|(s, t, _), _| !(s == schema && t == table));
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// The second connection used for metadata queries.
pub struct MetadataConnection {
    pool: mysql_async::Pool,
}

impl MetadataConnection {
    /// Build the pool. Credentials are percent-encoded into the URL which
    /// is dropped right after pool construction.
    pub fn connect(host: &str, port: u16, user: &str, password: Option<&str>) -> Self {
        let encoded_user: String = url::form_urlencoded::byte_serialize(user.as_bytes()).collect();
        let encoded_password: String =
            url::form_urlencoded::byte_serialize(password.unwrap_or("").as_bytes()).collect();
        let pool = {
            let url = format!("mysql://{encoded_user}:{encoded_password}@{host}:{port}/");
            mysql_async::Pool::new(url.as_str())
        };
        Self { pool }
    }

    /// Column names of a table in ordinal order.
    pub async fn column_names(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT COLUMN_NAME
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| CdcError::schema(format!("metadata connection failed: {e}")))?;
        let columns: Vec<String> = conn
            .exec(query, (schema, table))
            .await
            .map_err(|e| CdcError::schema(format!("column name lookup failed: {e}")))?;

        debug!(schema, table, count = columns.len(), "fetched column names");
        Ok(columns)
    }

    /// Enum labels of a column, parsed from its COLUMN_TYPE definition.
    pub async fn enum_labels(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Vec<String>> {
        let query = r#"
            SELECT COLUMN_TYPE
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND COLUMN_NAME = ?
        "#;

        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| CdcError::schema(format!("metadata connection failed: {e}")))?;
        let definitions: Vec<String> = conn
            .exec(query, (schema, table, column))
            .await
            .map_err(|e| CdcError::schema(format!("enum definition lookup failed: {e}")))?;

        let definition = definitions
            .into_iter()
            .next()
            .ok_or_else(|| CdcError::schema(format!("no definition for {schema}.{table}.{column}")))?;
        let labels = parse_enum_definition(&definition);
        if labels.is_empty() {
            warn!(schema, table, column, definition = %definition, "no enum labels parsed");
        }
        Ok(labels)
    }

    /// Whether the server writes binlog checksums.
    pub async fn binlog_checksum_enabled(&self) -> Result<bool> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| CdcError::connect(format!("metadata connection failed: {e}")))?;
        let rows: Vec<Row> = conn
            .query("SHOW GLOBAL VARIABLES LIKE 'binlog_checksum'")
            .await
            .map_err(|e| CdcError::connect(format!("checksum detection failed: {e}")))?;

        for row in rows {
            if let Some(value) = row.get::<String, _>(1) {
                if !value.eq_ignore_ascii_case("NONE") {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Current master position, for starting with neither a checkpoint nor
    /// a configured file. Tries the 8.2+ statement first.
    pub async fn master_position(&self) -> Result<(String, u64)> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| CdcError::connect(format!("metadata connection failed: {e}")))?;

        let rows: Vec<Row> = match conn.query("SHOW BINARY LOG STATUS").await {
            Ok(rows) => rows,
            Err(_) => conn
                .query("SHOW MASTER STATUS")
                .await
                .map_err(|e| CdcError::connect(format!("cannot read master position: {e}")))?,
        };

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| CdcError::connect("master status returned no rows; is binary logging enabled?"))?;
        let file: String = row.get(0).unwrap_or_default();
        let position: u64 = row.get(1).unwrap_or(4);
        if file.is_empty() {
            return Err(CdcError::connect(
                "master status returned an empty file name; is binary logging enabled?",
            ));
        }
        Ok((file, position))
    }

    pub async fn disconnect(self) {
        let _ = self.pool.disconnect().await;
    }
}

/// Parse the labels out of `enum('a','b','c')`.
///
/// Doubled quotes inside a label (`'it''s'`) decode to one quote.
pub fn parse_enum_definition(definition: &str) -> Vec<String> {
    let open = match definition.find('(') {
        Some(i) => i + 1,
        None => return Vec::new(),
    };
    let close = match definition.rfind(')') {
        Some(i) if i > open => i,
        _ => return Vec::new(),
    };

    let body = &definition[open..close];
    let mut labels = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut label = String::new();
        loop {
            match chars.next() {
                Some('\'') => {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                        label.push('\'');
                    } else {
                        break;
                    }
                }
                Some(c) => label.push(c),
                None => break,
            }
        }
        labels.push(label);
    }

    labels
}
