//! MySQL/MariaDB CDC source
//!
//! Runs the decode loop: negotiates the dialect, restores the resume
//! position, streams binlog events, applies the capture policy and emits
//! [`ChangeRecord`]s through a bounded channel.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::common::{
    CapturePolicy, CdcError, ChangeRecord, CheckpointFile, CheckpointPolicy, RecordKind, Result,
    RowImage, SourcePosition, TableProjection, STREAM_WAKE_SECS,
};
use crate::mysql::decoder::{
    column_type, BinlogDecoder, BinlogEvent, ColumnValue, QueryEvent, RowData, RowsEvent,
    RowsKind, TableMapEvent,
};
use crate::mysql::protocol::MySqlBinlogClient;
use crate::mysql::schema::{MetadataConnection, SchemaCache};

/// Display limit for BLOB/TEXT payloads. Longer values are truncated and
/// marked with a trailing `...`; full-fidelity blob transport is out of
/// scope.
pub const BLOB_DISPLAY_LIMIT: usize = 200;

/// How long a DDL statement may grow inside a DDL record.
const DDL_QUERY_LIMIT: usize = 2048;

/// MySQL source configuration, one replication connection.
///
/// The Debug impl redacts the password so configs can be logged.
#[derive(Clone)]
pub struct MySqlSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// Replica server id; must be unique on the topology.
    pub server_id: u32,
    /// Starting binlog file; `None` resumes from the checkpoint or the
    /// server's current position.
    pub binlog_file: Option<String>,
    pub binlog_position: u64,
    pub save_last_position: bool,
    /// 0 saves after every event, `n` after every `n` events.
    pub save_position_event_count: u64,
    pub checkpoint_file: PathBuf,
}

impl std::fmt::Debug for MySqlSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlSourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("server_id", &self.server_id)
            .field("binlog_file", &self.binlog_file)
            .field("binlog_position", &self.binlog_position)
            .field("save_last_position", &self.save_last_position)
            .field("checkpoint_file", &self.checkpoint_file)
            .finish_non_exhaustive()
    }
}

/// A captured table currently known from a TABLE_MAP.
struct ActiveTable {
    database: String,
    table: String,
    projection: TableProjection,
    /// Labels for projected enum columns, keyed by wire column index.
    enum_labels: HashMap<usize, Vec<String>>,
}

/// MySQL CDC source.
pub struct MySqlSource {
    config: MySqlSourceConfig,
    policy: CapturePolicy,
    checkpoint: CheckpointFile,
}

impl MySqlSource {
    pub fn new(config: MySqlSourceConfig, policy: CapturePolicy) -> Self {
        let cadence = if config.save_position_event_count > 0 {
            CheckpointPolicy::EveryN(config.save_position_event_count)
        } else {
            CheckpointPolicy::EveryEvent
        };
        let checkpoint = CheckpointFile::new(
            config.checkpoint_file.clone(),
            cadence,
            config.save_last_position,
        );
        Self {
            config,
            policy,
            checkpoint,
        }
    }

    /// Run the decode loop until the stream ends or `shutdown` flips.
    pub async fn run(
        &self,
        events: mpsc::Sender<ChangeRecord>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let config = &self.config;

        let metadata = MetadataConnection::connect(
            &config.host,
            config.port,
            &config.username,
            config.password.as_deref(),
        );

        let checksum = match metadata.binlog_checksum_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                debug!(error = %e, "checksum detection failed, assuming none");
                false
            }
        };

        let mut client = MySqlBinlogClient::connect(
            &config.host,
            config.port,
            &config.username,
            config.password.as_deref(),
        )
        .await
        .map_err(|e| CdcError::connect(e.to_string()))?;

        let is_mariadb = client.is_mariadb();
        self.negotiate_dialect(&mut client, is_mariadb).await;

        let (start_file, start_position) = self.resume_position(&metadata).await?;
        info!(file = %start_file, position = start_position, "streaming binlog");

        client
            .register_slave(config.server_id)
            .await
            .map_err(|e| CdcError::connect(e.to_string()))?;
        let mut stream = client
            .binlog_dump(config.server_id, &start_file, start_position as u32)
            .await
            .map_err(|e| CdcError::connect(e.to_string()))?;

        let mut decoder = BinlogDecoder::new(checksum);
        let mut schema_cache = SchemaCache::new();
        let mut known_maps: HashMap<(String, String), (usize, Vec<u8>)> = HashMap::new();
        let mut active_tables: HashMap<u64, ActiveTable> = HashMap::new();

        let mut current_file = start_file;
        let mut current_position = start_position;
        let mut txn: Option<String> = None;
        let mut last_database = String::new();
        let mut events_received: u64 = 0;

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let raw = match timeout(
                Duration::from_secs(STREAM_WAKE_SECS),
                stream.next_event(),
            )
            .await
            {
                Err(_) => continue, // idle wake, re-check shutdown
                Ok(Ok(Some(raw))) => raw,
                Ok(Ok(None)) => break Err(CdcError::ConnectionClosed),
                Ok(Err(e)) => break Err(CdcError::replication(e.to_string())),
            };

            let decoded = match decoder.decode(&raw) {
                Ok(decoded) => decoded,
                Err(e) => break Err(CdcError::replication(e.to_string())),
            };
            events_received += 1;
            if decoded.header.next_position > 0 {
                current_position = decoded.header.next_position as u64;
            }
            let position = SourcePosition::MySql {
                file: current_file.clone(),
                offset: current_position,
            };

            let mut record_kind = RecordKind::Insert;
            match decoded.event {
                BinlogEvent::FormatDescription {
                    binlog_version,
                    server_version,
                } => {
                    info!(binlog_version, server = %server_version, "format description");
                }
                BinlogEvent::Rotate {
                    position: new_position,
                    next_file,
                } => {
                    info!(file = %next_file, position = new_position, "binlog rotate");
                    current_file = next_file;
                    current_position = new_position;
                    self.checkpoint.flush(&SourcePosition::MySql {
                        file: current_file.clone(),
                        offset: current_position,
                    });
                    continue;
                }
                BinlogEvent::TableMap(map) => {
                    last_database = map.schema_name.clone();
                    if txn.is_none() {
                        txn = Some(ChangeRecord::new_txn_id());
                    }
                    self.handle_table_map(
                        &map,
                        &metadata,
                        &mut schema_cache,
                        &mut known_maps,
                        &mut decoder,
                        &mut active_tables,
                    )
                    .await;
                }
                BinlogEvent::Rows(rows) => {
                    record_kind = match rows.kind {
                        RowsKind::Write => RecordKind::Insert,
                        RowsKind::Update => RecordKind::Update,
                        RowsKind::Delete => RecordKind::Delete,
                    };
                    if rows.captured && !rows.rows.is_empty() {
                        if let Some(active) = active_tables.get(&rows.table_id) {
                            let txn_id = txn
                                .get_or_insert_with(ChangeRecord::new_txn_id)
                                .clone();
                            let record =
                                shape_rows_record(&rows, active, txn_id, position.clone());
                            if events.send(record).await.is_err() {
                                info!("event receiver dropped, stopping");
                                break Ok(());
                            }
                        }
                    }
                }
                BinlogEvent::Query(query) => {
                    self.handle_query(&query, &mut txn, &position, &events).await;
                    record_kind = RecordKind::Ddl;
                }
                BinlogEvent::Xid { xid } => {
                    record_kind = RecordKind::Commit;
                    if let Some(txn_id) = txn.take() {
                        debug!(txn = %txn_id, xid, "transaction committed");
                        if self.policy.captures_ddl(&last_database) {
                            let record = ChangeRecord {
                                kind: RecordKind::Commit,
                                txn: txn_id,
                                database: last_database.clone(),
                                table: String::new(),
                                primary_key: Vec::new(),
                                rows: Vec::new(),
                                query: None,
                                xid: Some(xid),
                                position: position.clone(),
                            };
                            if events.send(record).await.is_err() {
                                info!("event receiver dropped, stopping");
                                break Ok(());
                            }
                        }
                    }
                }
                BinlogEvent::Heartbeat => {
                    debug!("binlog heartbeat");
                }
                BinlogEvent::Ignored(event_type) => {
                    debug!(event_type, "unhandled binlog event");
                }
            }

            self.checkpoint.record(&position, record_kind);
        };

        self.checkpoint.flush(&SourcePosition::MySql {
            file: current_file,
            offset: current_position,
        });
        metadata.disconnect().await;
        info!(events = events_received, "mysql source stopped");
        result
    }

    /// Checksum announcement plus the MariaDB-only capability flag. Sending
    /// the capability to vanilla MySQL breaks the session, so it is guarded
    /// by the dialect check.
    async fn negotiate_dialect(&self, client: &mut MySqlBinlogClient, is_mariadb: bool) {
        if let Err(e) = client
            .query("SET @master_binlog_checksum = @@GLOBAL.binlog_checksum")
            .await
        {
            debug!(error = %e, "binlog checksum announce failed");
        }
        if let Err(e) = client
            .query("SET @source_binlog_checksum = @@GLOBAL.binlog_checksum")
            .await
        {
            debug!(error = %e, "source checksum announce failed");
        }
        if is_mariadb {
            if let Err(e) = client.query("SET @mariadb_slave_capability = 4").await {
                debug!(error = %e, "mariadb capability announce failed");
            }
        }
    }

    /// Checkpoint, then configured file, then the server's own position.
    async fn resume_position(&self, metadata: &MetadataConnection) -> Result<(String, u64)> {
        if let Some(SourcePosition::MySql { file, offset }) = self.checkpoint.load()? {
            info!(file = %file, offset, "restored checkpoint");
            return Ok((file, offset));
        }
        if let Some(file) = &self.config.binlog_file {
            return Ok((file.clone(), self.config.binlog_position));
        }
        let (file, position) = metadata.master_position().await?;
        info!(file = %file, position, "starting from current master position");
        Ok((file, position))
    }

    async fn handle_table_map(
        &self,
        map: &TableMapEvent,
        metadata: &MetadataConnection,
        schema_cache: &mut SchemaCache,
        known_maps: &mut HashMap<(String, String), (usize, Vec<u8>)>,
        decoder: &mut BinlogDecoder,
        active_tables: &mut HashMap<u64, ActiveTable>,
    ) {
        let database = &map.schema_name;
        let table = &map.table_name;

        let table_config = match self.policy.table(database, table) {
            Some(config) if self.policy.captures_dml(database) => config,
            _ => {
                debug!(database, table, "table not captured");
                decoder.set_projection(map.table_id, None);
                active_tables.remove(&map.table_id);
                return;
            }
        };

        // A changed column set invalidates the cached names and labels.
        let key = (database.clone(), table.clone());
        let shape = (map.column_count, map.column_types.clone());
        if let Some(known) = known_maps.get(&key) {
            if *known != shape {
                info!(database, table, "column set changed, refreshing schema");
                schema_cache.invalidate_table(database, table);
            }
        }
        known_maps.insert(key, shape);

        let names = match schema_cache.columns(database, table) {
            Some(names) => Some(names.clone()),
            None => match metadata.column_names(database, table).await {
                Ok(names) if !names.is_empty() => {
                    schema_cache.set_columns(database, table, names.clone());
                    Some(names)
                }
                Ok(_) => None,
                Err(e) => {
                    warn!(database, table, error = %e, "column name lookup failed, using positional names");
                    None
                }
            },
        };

        let projection = match names {
            Some(names) => table_config.resolve(&names),
            None => table_config.resolve_positional(map.column_count),
        };
        decoder.set_projection(map.table_id, Some(projection.indices()));

        // Pre-fetch enum labels for the projected enum columns.
        let mut enum_labels = HashMap::new();
        for column in &projection.columns {
            if map.real_types.get(column.index) != Some(&column_type::ENUM) {
                continue;
            }
            let labels = match schema_cache.enum_labels(database, table, &column.name) {
                Some(labels) => Some(labels.clone()),
                None => match metadata.enum_labels(database, table, &column.name).await {
                    Ok(labels) => {
                        schema_cache.set_enum_labels(database, table, &column.name, labels.clone());
                        Some(labels)
                    }
                    Err(e) => {
                        warn!(database, table, column = %column.name, error = %e, "enum label lookup failed");
                        None
                    }
                },
            };
            if let Some(labels) = labels {
                enum_labels.insert(column.index, labels);
            }
        }

        active_tables.insert(
            map.table_id,
            ActiveTable {
                database: database.clone(),
                table: table.clone(),
                projection,
                enum_labels,
            },
        );
    }

    async fn handle_query(
        &self,
        query: &QueryEvent,
        txn: &mut Option<String>,
        position: &SourcePosition,
        events: &mpsc::Sender<ChangeRecord>,
    ) {
        let statement = query.query.trim_start();
        let keyword = statement
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();

        match keyword.as_str() {
            "BEGIN" => {
                let id = ChangeRecord::new_txn_id();
                debug!(txn = %id, "transaction begin");
                *txn = Some(id);
            }
            "COMMIT" | "ROLLBACK" => {
                if let Some(id) = txn.take() {
                    debug!(txn = %id, statement = %keyword, "transaction closed");
                }
            }
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" => {
                if txn.is_none() {
                    *txn = Some(ChangeRecord::new_txn_id());
                }
                if query.schema.is_empty() || !self.policy.captures_ddl(&query.schema) {
                    debug!(database = %query.schema, "DDL not captured");
                    return;
                }
                let mut text = statement.to_string();
                if text.len() > DDL_QUERY_LIMIT {
                    text.truncate(
                        (0..=DDL_QUERY_LIMIT)
                            .rev()
                            .find(|&i| text.is_char_boundary(i))
                            .unwrap_or(0),
                    );
                }
                let record = ChangeRecord {
                    kind: RecordKind::Ddl,
                    txn: txn.clone().unwrap_or_default(),
                    database: query.schema.clone(),
                    table: String::new(),
                    primary_key: Vec::new(),
                    rows: Vec::new(),
                    query: Some(text),
                    xid: None,
                    position: position.clone(),
                };
                if events.send(record).await.is_err() {
                    error!("event receiver dropped while publishing DDL");
                }
            }
            _ => {
                debug!(statement = %keyword, "query event ignored");
            }
        }
    }
}

fn shape_rows_record(
    rows: &RowsEvent,
    active: &ActiveTable,
    txn: String,
    position: SourcePosition,
) -> ChangeRecord {
    let kind = match rows.kind {
        RowsKind::Write => RecordKind::Insert,
        RowsKind::Update => RecordKind::Update,
        RowsKind::Delete => RecordKind::Delete,
    };

    let shaped = rows
        .rows
        .iter()
        .map(|row| shape_row(row, rows.kind, active))
        .collect();

    ChangeRecord {
        kind,
        txn,
        database: active.database.clone(),
        table: active.table.clone(),
        primary_key: active.projection.primary_key.clone(),
        rows: shaped,
        query: None,
        xid: None,
        position,
    }
}

fn shape_row(row: &RowData, kind: RowsKind, active: &ActiveTable) -> RowImage {
    let image = |values: &[(usize, ColumnValue)]| {
        let mut map = serde_json::Map::new();
        for (index, value) in values {
            if let Some(name) = active.projection.name_of(*index) {
                map.insert(
                    name.to_string(),
                    column_value_to_json(value, active.enum_labels.get(index)),
                );
            }
        }
        map
    };

    match kind {
        RowsKind::Write => RowImage::Values(image(row.after.as_deref().unwrap_or(&[]))),
        RowsKind::Delete => RowImage::Values(image(row.before.as_deref().unwrap_or(&[]))),
        RowsKind::Update => RowImage::Diff {
            before: row.before.as_deref().map(image),
            after: image(row.after.as_deref().unwrap_or(&[])),
        },
    }
}

/// Shape one decoded column value for the event JSON.
///
/// Numbers stay numbers, temporals become ISO-8601 strings with sub-second
/// precision when present, blobs become display strings truncated at
/// [`BLOB_DISPLAY_LIMIT`], enum ordinals expand to their label when known.
fn column_value_to_json(value: &ColumnValue, enum_labels: Option<&Vec<String>>) -> Value {
    match value {
        ColumnValue::Null => Value::Null,
        ColumnValue::SignedInt(v) => Value::from(*v),
        ColumnValue::Float(v) => Value::from(*v),
        ColumnValue::Double(v) => Value::from(*v),
        ColumnValue::Decimal(text) => {
            if let Ok(v) = text.parse::<i64>() {
                Value::from(v)
            } else if let Ok(v) = text.parse::<f64>() {
                Value::from(v)
            } else {
                Value::String(text.clone())
            }
        }
        ColumnValue::String(v) => Value::String(v.clone()),
        ColumnValue::Bytes(bytes) => Value::String(blob_display(bytes)),
        ColumnValue::Date { year, month, day } => {
            Value::String(format!("{year:04}-{month:02}-{day:02}"))
        }
        ColumnValue::Time {
            negative,
            hours,
            minutes,
            seconds,
            microseconds,
        } => {
            let sign = if *negative { "-" } else { "" };
            if *microseconds > 0 {
                Value::String(format!(
                    "{sign}{hours:02}:{minutes:02}:{seconds:02}.{microseconds:06}"
                ))
            } else {
                Value::String(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"))
            }
        }
        ColumnValue::DateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
            microseconds,
        } => {
            if *microseconds > 0 {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{microseconds:06}"
                ))
            } else {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"
                ))
            }
        }
        ColumnValue::Timestamp(v) => Value::from(*v),
        ColumnValue::Year(v) => Value::from(*v),
        ColumnValue::Json(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => serde_json::from_str(text)
                .unwrap_or_else(|_| Value::String(text.to_string())),
            Err(_) => Value::String(blob_display(bytes)),
        },
        ColumnValue::Enum(ordinal) => {
            let label = enum_labels.and_then(|labels| {
                (*ordinal >= 1)
                    .then(|| labels.get(*ordinal as usize - 1))
                    .flatten()
            });
            match label {
                Some(label) => Value::String(label.clone()),
                None => Value::from(*ordinal),
            }
        }
        ColumnValue::Set(bits) => Value::from(*bits),
        ColumnValue::Bit(bits) => Value::from(*bits),
    }
}

/// Render a binary payload as a display string: printable ASCII kept,
/// everything else replaced with `.`, truncated with a `...` marker.
fn blob_display(bytes: &[u8]) -> String {
    let shown = bytes.len().min(BLOB_DISPLAY_LIMIT);
    let mut out = String::with_capacity(shown + 3);
    for &b in &bytes[..shown] {
        if (32..=126).contains(&b) {
            out.push(b as char);
        } else {
            out.push('.');
        }
    }
    if bytes.len() > BLOB_DISPLAY_LIMIT {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::capture::{CaptureColumns, ProjectedColumn, TableCapture};

    fn active_table() -> ActiveTable {
        let capture = TableCapture {
            name: "users".into(),
            primary_key: vec!["id".into()],
            columns: CaptureColumns::All,
        };
        let projection = capture.resolve(&[
            "id".to_string(),
            "name".to_string(),
            "size".to_string(),
        ]);
        let mut enum_labels = HashMap::new();
        enum_labels.insert(2usize, vec!["small".to_string(), "large".to_string()]);
        ActiveTable {
            database: "testdb".into(),
            table: "users".into(),
            projection,
            enum_labels,
        }
    }

    #[test]
    fn test_blob_display_truncates_at_limit() {
        let short = vec![b'a'; 10];
        assert_eq!(blob_display(&short), "aaaaaaaaaa");

        let long = vec![b'b'; BLOB_DISPLAY_LIMIT + 50];
        let shown = blob_display(&long);
        assert_eq!(shown.len(), BLOB_DISPLAY_LIMIT + 3);
        assert!(shown.ends_with("..."));

        let binary = vec![0x00, b'x', 0xFF];
        assert_eq!(blob_display(&binary), ".x.");
    }

    #[test]
    fn test_enum_expansion() {
        let labels = vec!["small".to_string(), "large".to_string()];
        assert_eq!(
            column_value_to_json(&ColumnValue::Enum(2), Some(&labels)),
            Value::String("large".into())
        );
        // Out of range or unknown labels fall back to the ordinal.
        assert_eq!(
            column_value_to_json(&ColumnValue::Enum(9), Some(&labels)),
            Value::from(9)
        );
        assert_eq!(
            column_value_to_json(&ColumnValue::Enum(1), None),
            Value::from(1)
        );
    }

    #[test]
    fn test_temporal_shaping() {
        let datetime = ColumnValue::DateTime {
            year: 2024,
            month: 3,
            day: 9,
            hour: 7,
            minute: 5,
            second: 1,
            microseconds: 250_000,
        };
        assert_eq!(
            column_value_to_json(&datetime, None),
            Value::String("2024-03-09T07:05:01.250000".into())
        );

        let time = ColumnValue::Time {
            negative: true,
            hours: 1,
            minutes: 2,
            seconds: 3,
            microseconds: 0,
        };
        assert_eq!(
            column_value_to_json(&time, None),
            Value::String("-01:02:03".into())
        );
    }

    #[test]
    fn test_decimal_shaping() {
        assert_eq!(
            column_value_to_json(&ColumnValue::Decimal("42".into()), None),
            Value::from(42)
        );
        assert_eq!(
            column_value_to_json(&ColumnValue::Decimal("12.5".into()), None),
            Value::from(12.5)
        );
        assert_eq!(
            column_value_to_json(&ColumnValue::Decimal("not-a-number".into()), None),
            Value::String("not-a-number".into())
        );
    }

    #[test]
    fn test_json_column_passthrough() {
        let value = column_value_to_json(&ColumnValue::Json(br#"{"a":1}"#.to_vec()), None);
        assert_eq!(value, serde_json::json!({"a": 1}));

        let invalid = column_value_to_json(&ColumnValue::Json(b"not json".to_vec()), None);
        assert_eq!(invalid, Value::String("not json".into()));
    }

    #[test]
    fn test_shape_insert_record() {
        let active = active_table();
        let rows = RowsEvent {
            table_id: 1,
            kind: RowsKind::Write,
            captured: true,
            rows: vec![RowData {
                before: None,
                after: Some(vec![
                    (0, ColumnValue::SignedInt(7)),
                    (1, ColumnValue::String("ann".into())),
                    (2, ColumnValue::Enum(1)),
                ]),
            }],
        };

        let record = shape_rows_record(
            &rows,
            &active,
            "txn-1".into(),
            SourcePosition::MySql {
                file: "mysql-bin.000001".into(),
                offset: 1000,
            },
        );

        assert_eq!(
            record.to_json(),
            r#"{"type":"INSERT","txn":"txn-1","db":"testdb","table":"users","primary_key":["id"],"rows":[{"id":7,"name":"ann","size":"small"}]}"#
        );
    }

    #[test]
    fn test_shape_update_record_keeps_images() {
        let active = ActiveTable {
            database: "testdb".into(),
            table: "users".into(),
            projection: TableProjection {
                primary_key: vec![],
                columns: vec![ProjectedColumn {
                    index: 2,
                    name: "balance".into(),
                }],
            },
            enum_labels: HashMap::new(),
        };

        let rows = RowsEvent {
            table_id: 1,
            kind: RowsKind::Update,
            captured: true,
            rows: vec![RowData {
                before: Some(vec![(2, ColumnValue::SignedInt(25))]),
                after: Some(vec![(2, ColumnValue::SignedInt(100))]),
            }],
        };

        let record = shape_rows_record(
            &rows,
            &active,
            "txn-2".into(),
            SourcePosition::MySql {
                file: "mysql-bin.000001".into(),
                offset: 2000,
            },
        );

        assert_eq!(
            record.to_json(),
            r#"{"type":"UPDATE","txn":"txn-2","db":"testdb","table":"users","rows":[{"before":{"balance":25},"after":{"balance":100}}]}"#
        );
    }
}
