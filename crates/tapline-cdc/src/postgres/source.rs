//! PostgreSQL CDC source
//!
//! Runs the decode loop over the pgoutput stream. Resume safety hinges on
//! the startup clamp: the used start LSN is
//! `min(local checkpoint, slot.confirmed_flush_lsn)` — the server cannot
//! replay WAL it has already discarded, and starting below the local
//! checkpoint only re-delivers.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Buf;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, info, warn};

use crate::common::{
    CapturePolicy, CdcError, ChangeRecord, CheckpointFile, CheckpointPolicy, Lsn, RecordKind,
    Result, RowImage, SourcePosition, TableProjection, STREAM_WAKE_SECS,
};
use crate::postgres::protocol::{
    PgOutputDecoder, RelationBody, ReplicationClient, ReplicationMessage, Tuple, TupleData,
};

/// Cadence of unsolicited standby status updates.
const FEEDBACK_INTERVAL_SECS: u64 = 10;

/// Postgres source configuration, one replication connection.
///
/// The Debug impl redacts the password so configs can be logged.
#[derive(Clone)]
pub struct PostgresSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: String,
    pub slot_name: String,
    pub publication_name: String,
    /// Configured start position; `None` means the server's current WAL
    /// position. A checkpoint always wins over this.
    pub start_lsn: Option<Lsn>,
    pub save_last_position: bool,
    /// 0 saves at commit, `n` after every `n` events.
    pub save_position_event_count: u64,
    pub checkpoint_file: PathBuf,
}

impl std::fmt::Debug for PostgresSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .field("slot_name", &self.slot_name)
            .field("publication_name", &self.publication_name)
            .field("start_lsn", &self.start_lsn)
            .field("save_last_position", &self.save_last_position)
            .field("checkpoint_file", &self.checkpoint_file)
            .finish_non_exhaustive()
    }
}

/// A relation announced by the stream, with its resolved capture state.
struct Relation {
    body: RelationBody,
    /// `None` when the table is not captured.
    projection: Option<TableProjection>,
}

/// PostgreSQL CDC source.
pub struct PostgresSource {
    config: PostgresSourceConfig,
    policy: CapturePolicy,
    checkpoint: CheckpointFile,
}

impl PostgresSource {
    pub fn new(config: PostgresSourceConfig, policy: CapturePolicy) -> Self {
        let cadence = if config.save_position_event_count > 0 {
            CheckpointPolicy::EveryN(config.save_position_event_count)
        } else {
            CheckpointPolicy::AtCommit
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

        let mut client = ReplicationClient::connect(
            &config.host,
            config.port,
            &config.username,
            &config.database,
            config.password.as_deref(),
        )
        .await
        .map_err(|e| CdcError::connect(e.to_string()))?;

        let start_lsn = self.clamped_start_lsn(&mut client).await?;
        info!(lsn = %start_lsn, slot = %config.slot_name, "streaming from");

        let mut stream = client
            .start_replication(&config.slot_name, start_lsn, &config.publication_name)
            .await
            .map_err(|e| CdcError::connect(e.to_string()))?;

        let mut relations: HashMap<u32, Relation> = HashMap::new();
        let mut current_lsn = start_lsn;
        let mut txn: Option<String> = None;
        let mut last_feedback = Instant::now();
        let mut events_received: u64 = 0;

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            if last_feedback.elapsed() >= Duration::from_secs(FEEDBACK_INTERVAL_SECS) {
                if let Err(e) = stream.send_status_update(current_lsn).await {
                    break Err(CdcError::replication(e.to_string()));
                }
                last_feedback = Instant::now();
            }

            let mut frame = match timeout(
                Duration::from_secs(STREAM_WAKE_SECS),
                stream.next_message(),
            )
            .await
            {
                Err(_) => continue, // idle wake, re-check shutdown
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => break Err(CdcError::ConnectionClosed),
                Ok(Err(e)) => break Err(CdcError::replication(e.to_string())),
            };

            if !frame.has_remaining() {
                continue;
            }
            match frame.get_u8() {
                b'w' => {
                    if frame.remaining() < 24 {
                        break Err(CdcError::replication("short XLogData frame"));
                    }
                    let _wal_start = frame.get_u64();
                    let wal_end = frame.get_u64();
                    let _send_time = frame.get_i64();
                    current_lsn = current_lsn.max(Lsn(wal_end));
                    events_received += 1;

                    let message = match PgOutputDecoder::decode(&mut frame) {
                        Ok(message) => message,
                        Err(e) => break Err(CdcError::replication(e.to_string())),
                    };

                    let position = SourcePosition::Postgres { lsn: current_lsn };
                    match message {
                        ReplicationMessage::Begin(begin) => {
                            let id = ChangeRecord::new_txn_id();
                            debug!(txn = %id, xid = begin.xid, "transaction begin");
                            txn = Some(id);
                        }
                        ReplicationMessage::Commit(commit) => {
                            current_lsn = current_lsn.max(Lsn(commit.end_lsn));
                            if let Some(id) = txn.take() {
                                debug!(txn = %id, lsn = %Lsn(commit.commit_lsn), "transaction commit");
                            }
                            self.checkpoint.record(
                                &SourcePosition::Postgres { lsn: current_lsn },
                                RecordKind::Commit,
                            );
                        }
                        ReplicationMessage::Relation(body) => {
                            let relation = self.resolve_relation(body);
                            relations.insert(relation.body.id, relation);
                        }
                        ReplicationMessage::Insert(insert) => {
                            if let Some(record) = shape_dml(
                                &relations,
                                insert.relation_id,
                                RecordKind::Insert,
                                None,
                                Some(&insert.tuple),
                                &mut txn,
                                position.clone(),
                            ) {
                                if events.send(record).await.is_err() {
                                    info!("event receiver dropped, stopping");
                                    break Ok(());
                                }
                            }
                            self.checkpoint.record(&position, RecordKind::Insert);
                        }
                        ReplicationMessage::Update(update) => {
                            if let Some(record) = shape_dml(
                                &relations,
                                update.relation_id,
                                RecordKind::Update,
                                update.old_tuple.as_ref(),
                                Some(&update.new_tuple),
                                &mut txn,
                                position.clone(),
                            ) {
                                if events.send(record).await.is_err() {
                                    info!("event receiver dropped, stopping");
                                    break Ok(());
                                }
                            }
                            self.checkpoint.record(&position, RecordKind::Update);
                        }
                        ReplicationMessage::Delete(delete) => {
                            if let Some(record) = shape_dml(
                                &relations,
                                delete.relation_id,
                                RecordKind::Delete,
                                delete.old_tuple.as_ref(),
                                None,
                                &mut txn,
                                position.clone(),
                            ) {
                                if events.send(record).await.is_err() {
                                    info!("event receiver dropped, stopping");
                                    break Ok(());
                                }
                            }
                            self.checkpoint.record(&position, RecordKind::Delete);
                        }
                        ReplicationMessage::Truncate(truncate) => {
                            debug!(relations = ?truncate.relation_ids, "truncate ignored");
                        }
                        ReplicationMessage::Other(kind) => {
                            let kind = kind as char;
                            debug!(message = %kind, "pgoutput message ignored");
                        }
                    }
                }
                b'k' => {
                    if frame.remaining() < 17 {
                        break Err(CdcError::replication("short keepalive frame"));
                    }
                    let wal_end = frame.get_u64();
                    let _ts = frame.get_i64();
                    let reply_requested = frame.get_u8();
                    current_lsn = current_lsn.max(Lsn(wal_end));

                    if reply_requested == 1 {
                        if let Err(e) = stream.send_status_update(current_lsn).await {
                            break Err(CdcError::replication(e.to_string()));
                        }
                        last_feedback = Instant::now();
                    }
                }
                other => {
                    let frame_type = other as char;
                    debug!(frame = %frame_type, "unknown copy frame");
                }
            }
        };

        // A final status update lets the slot's confirmed_flush_lsn advance
        // so WAL does not pile up while this process is away.
        if let Err(e) = stream.send_status_update(current_lsn).await {
            warn!(error = %e, "final status update failed");
        }
        self.checkpoint
            .flush(&SourcePosition::Postgres { lsn: current_lsn });
        info!(events = events_received, lsn = %current_lsn, "postgres source stopped");
        result
    }

    /// Resolve the start LSN: local checkpoint (or configured start, or the
    /// server's current position), clamped down to the slot's
    /// `confirmed_flush_lsn`. Creates the slot if it does not exist yet.
    async fn clamped_start_lsn(&self, client: &mut ReplicationClient) -> Result<Lsn> {
        let config = &self.config;

        let confirmed = match client
            .confirmed_flush_lsn(&config.slot_name)
            .await
            .map_err(|e| CdcError::connect(e.to_string()))?
        {
            Some(lsn) => lsn,
            None => {
                client
                    .create_replication_slot(&config.slot_name)
                    .await
                    .map_err(|e| CdcError::connect(e.to_string()))?;
                client
                    .confirmed_flush_lsn(&config.slot_name)
                    .await
                    .map_err(|e| CdcError::connect(e.to_string()))?
                    .ok_or_else(|| {
                        CdcError::connect(format!(
                            "slot {} has no confirmed_flush_lsn after creation",
                            config.slot_name
                        ))
                    })?
            }
        };

        let local = match self.checkpoint.load()? {
            Some(SourcePosition::Postgres { lsn }) => {
                info!(lsn = %lsn, "restored checkpoint");
                Some(lsn)
            }
            _ => config.start_lsn,
        };

        let local = match local {
            Some(lsn) => lsn,
            None => {
                let current = client
                    .current_wal_lsn()
                    .await
                    .map_err(|e| CdcError::connect(e.to_string()))?;
                info!(lsn = %current, "starting from current WAL position");
                current
            }
        };

        Ok(clamp_to_confirmed(local, confirmed))
    }

    fn resolve_relation(&self, body: RelationBody) -> Relation {
        let namespace = &body.namespace;
        let name = &body.name;

        let projection = match self.policy.table(namespace, name) {
            Some(table_config) if self.policy.captures_dml(namespace) => {
                let wire_names: Vec<String> =
                    body.columns.iter().map(|c| c.name.clone()).collect();
                let mut projection = table_config.resolve(&wire_names);
                if projection.primary_key.is_empty() {
                    // Fall back to the key columns the relation reports.
                    projection.primary_key = body
                        .columns
                        .iter()
                        .filter(|c| c.flags & 1 == 1)
                        .map(|c| c.name.clone())
                        .collect();
                }
                debug!(
                    relation = body.id,
                    schema = %namespace,
                    table = %name,
                    columns = projection.columns.len(),
                    "relation captured"
                );
                Some(projection)
            }
            _ => {
                debug!(schema = %namespace, table = %name, "relation not captured");
                None
            }
        };

        Relation { body, projection }
    }
}

/// Clamp the local resume position down to the slot's confirmed position.
///
/// A local checkpoint ahead of `confirmed_flush_lsn` points at WAL the
/// server will not replay; taking the minimum re-delivers instead of
/// skipping. The result never exceeds either input.
fn clamp_to_confirmed(local: Lsn, confirmed: Lsn) -> Lsn {
    if local > confirmed {
        warn!(
            local = %local,
            confirmed = %confirmed,
            "local position is ahead of the slot, clamping down to avoid skipping changes"
        );
    }
    local.min(confirmed)
}

/// Shape one DML message into a change record, or `None` when the relation
/// is unknown or not captured.
fn shape_dml(
    relations: &HashMap<u32, Relation>,
    relation_id: u32,
    kind: RecordKind,
    old_tuple: Option<&Tuple>,
    new_tuple: Option<&Tuple>,
    txn: &mut Option<String>,
    position: SourcePosition,
) -> Option<ChangeRecord> {
    let relation = match relations.get(&relation_id) {
        Some(relation) => relation,
        None => {
            warn!(relation_id, "DML for unknown relation");
            return None;
        }
    };
    let projection = relation.projection.as_ref()?;

    let row = match kind {
        RecordKind::Insert => RowImage::Values(tuple_to_map(new_tuple?, relation, projection)),
        RecordKind::Delete => RowImage::Values(tuple_to_map(old_tuple?, relation, projection)),
        RecordKind::Update => RowImage::Diff {
            before: old_tuple.map(|t| tuple_to_map(t, relation, projection)),
            after: tuple_to_map(new_tuple?, relation, projection),
        },
        _ => return None,
    };

    Some(ChangeRecord {
        kind,
        txn: txn.get_or_insert_with(ChangeRecord::new_txn_id).clone(),
        database: relation.body.namespace.clone(),
        table: relation.body.name.clone(),
        primary_key: projection.primary_key.clone(),
        rows: vec![row],
        query: None,
        xid: None,
        position,
    })
}

/// Project a tuple into an ordered JSON object. Unchanged-TOAST columns are
/// elided, not emitted as null.
fn tuple_to_map(
    tuple: &Tuple,
    relation: &Relation,
    projection: &TableProjection,
) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    for (index, data) in tuple.0.iter().enumerate() {
        let Some(name) = projection.name_of(index) else {
            continue;
        };
        match data {
            TupleData::Toast => continue,
            TupleData::Null => {
                map.insert(name.to_string(), Value::Null);
            }
            TupleData::Text(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                let type_id = relation
                    .body
                    .columns
                    .get(index)
                    .map(|c| c.type_id)
                    .unwrap_or(25);
                map.insert(name.to_string(), text_to_typed_json(&text, type_id));
            }
        }
    }
    map
}

/// Give text column values their natural JSON type based on the column OID.
/// Unrecognized OIDs stay strings.
fn text_to_typed_json(text: &str, type_id: i32) -> Value {
    const BOOL: i32 = 16;
    const INT8: i32 = 20;
    const INT2: i32 = 21;
    const INT4: i32 = 23;
    const OID: i32 = 26;
    const FLOAT4: i32 = 700;
    const FLOAT8: i32 = 701;
    const NUMERIC: i32 = 1700;
    const JSON: i32 = 114;
    const JSONB: i32 = 3802;

    match type_id {
        BOOL => match text {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        },
        INT2 | INT4 | INT8 | OID => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        FLOAT4 | FLOAT8 | NUMERIC => {
            if let Ok(v) = text.parse::<i64>() {
                Value::from(v)
            } else if let Ok(v) = text.parse::<f64>() {
                // NaN and infinities have no JSON number form.
                serde_json::Number::from_f64(v)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(text.to_string()))
            } else {
                Value::String(text.to_string())
            }
        }
        JSON | JSONB => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
        _ => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::capture::{CaptureColumns, TableCapture};
    use crate::postgres::protocol::Column;
    use bytes::Bytes;

    fn users_relation(captured_columns: CaptureColumns) -> Relation {
        let body = RelationBody {
            id: 16385,
            namespace: "public".into(),
            name: "users".into(),
            replica_identity: b'f',
            columns: vec![
                Column {
                    flags: 1,
                    name: "id".into(),
                    type_id: 23,
                    type_modifier: -1,
                },
                Column {
                    flags: 0,
                    name: "name".into(),
                    type_id: 25,
                    type_modifier: -1,
                },
            ],
        };
        let capture = TableCapture {
            name: "users".into(),
            primary_key: vec![],
            columns: captured_columns,
        };
        let wire: Vec<String> = body.columns.iter().map(|c| c.name.clone()).collect();
        let mut projection = capture.resolve(&wire);
        if projection.primary_key.is_empty() {
            projection.primary_key = body
                .columns
                .iter()
                .filter(|c| c.flags & 1 == 1)
                .map(|c| c.name.clone())
                .collect();
        }
        Relation {
            body,
            projection: Some(projection),
        }
    }

    fn text(value: &str) -> TupleData {
        TupleData::Text(Bytes::from(value.to_string().into_bytes()))
    }

    #[test]
    fn test_resume_clamp_never_exceeds_either_side() {
        let local: Lsn = "0/2000".parse().unwrap();
        let confirmed: Lsn = "0/1000".parse().unwrap();
        // Local checkpoint ahead of the slot: clamp down, re-deliver.
        assert_eq!(clamp_to_confirmed(local, confirmed), confirmed);
        // Local behind the slot: keep the local position.
        assert_eq!(clamp_to_confirmed(confirmed, local), confirmed);
        // Equal positions are a no-op.
        assert_eq!(clamp_to_confirmed(local, local), local);
    }

    #[test]
    fn test_typed_json_conversion() {
        assert_eq!(text_to_typed_json("t", 16), Value::Bool(true));
        assert_eq!(text_to_typed_json("42", 23), Value::from(42));
        assert_eq!(text_to_typed_json("1.5", 701), Value::from(1.5));
        assert_eq!(text_to_typed_json("NaN", 701), Value::String("NaN".into()));
        assert_eq!(
            text_to_typed_json(r#"{"k":1}"#, 3802),
            serde_json::json!({"k": 1})
        );
        assert_eq!(
            text_to_typed_json("plain", 25),
            Value::String("plain".into())
        );
    }

    #[test]
    fn test_delete_with_full_identity() {
        let relations = HashMap::from([(16385u32, users_relation(CaptureColumns::All))]);
        let tuple = Tuple(vec![text("3"), text("bob")]);
        let mut txn = Some("txn-9".to_string());

        let record = shape_dml(
            &relations,
            16385,
            RecordKind::Delete,
            Some(&tuple),
            None,
            &mut txn,
            SourcePosition::Postgres { lsn: Lsn(0x3000) },
        )
        .unwrap();

        assert_eq!(
            record.to_json(),
            r#"{"type":"DELETE","txn":"txn-9","schema":"public","table":"users","primary_key":["id"],"rows":[{"id":3,"name":"bob"}]}"#
        );
    }

    #[test]
    fn test_update_with_key_image_has_matching_columns() {
        let relations = HashMap::from([(16385u32, users_relation(CaptureColumns::All))]);
        let before = Tuple(vec![text("7"), TupleData::Null]);
        let after = Tuple(vec![text("7"), text("bob")]);
        let mut txn = Some("txn-10".to_string());

        let record = shape_dml(
            &relations,
            16385,
            RecordKind::Update,
            Some(&before),
            Some(&after),
            &mut txn,
            SourcePosition::Postgres { lsn: Lsn(0x3000) },
        )
        .unwrap();

        match &record.rows[0] {
            RowImage::Diff {
                before: Some(before),
                after,
            } => {
                // Identical key sets for the projected columns.
                let before_keys: Vec<&String> = before.keys().collect();
                let after_keys: Vec<&String> = after.keys().collect();
                assert_eq!(before_keys, after_keys);
            }
            other => panic!("expected diff image, got {other:?}"),
        }
    }

    #[test]
    fn test_toast_columns_are_elided() {
        let relation = users_relation(CaptureColumns::All);
        let projection = relation.projection.clone().unwrap();
        let tuple = Tuple(vec![text("1"), TupleData::Toast]);

        let map = tuple_to_map(&tuple, &relation, &projection);
        assert!(map.contains_key("id"));
        // Unchanged TOAST means "not included", not null.
        assert!(!map.contains_key("name"));
    }

    #[test]
    fn test_projection_filters_columns() {
        let relation = users_relation(CaptureColumns::Named(vec!["name".into()]));
        let projection = relation.projection.clone().unwrap();
        let tuple = Tuple(vec![text("1"), text("ann")]);

        let map = tuple_to_map(&tuple, &relation, &projection);
        assert!(!map.contains_key("id"));
        assert_eq!(map.get("name"), Some(&Value::String("ann".into())));
    }

    #[test]
    fn test_unknown_relation_produces_nothing() {
        let relations = HashMap::new();
        let tuple = Tuple(vec![text("1")]);
        let mut txn = None;
        assert!(shape_dml(
            &relations,
            99,
            RecordKind::Insert,
            None,
            Some(&tuple),
            &mut txn,
            SourcePosition::Postgres { lsn: Lsn(0) },
        )
        .is_none());
    }
}
