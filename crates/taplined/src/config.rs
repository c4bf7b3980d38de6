//! Daemon configuration
//!
//! One JSON file describes a whole pipeline: logging, exactly one source
//! server (`master_server` for MySQL/MariaDB or `postgres_server`), its
//! `replication` settings, the `capture` policy and the `publishers`.
//! Unknown sections are ignored; missing values get the daemon defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use tapline_cdc::common::capture::{
    CaptureColumns, CapturePolicy, DatabaseCapture, TableCapture,
};
use tapline_cdc::mysql::MySqlSourceConfig;
use tapline_cdc::postgres::PostgresSourceConfig;
use tapline_cdc::{CdcError, Lsn, Result};
use tapline_publish::{SinkConfig, DEFAULT_QUEUE_DEPTH};

const DEFAULT_MYSQL_CHECKPOINT: &str = "binlog_checkpoint.dat";
const DEFAULT_PG_CHECKPOINT: &str = "pg_checkpoint.dat";

/// Logging section. Rotation fields are accepted for compatibility; file
/// rotation itself is the supervisor's job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub stdout: Option<String>,
    pub log_file: Option<String>,
    #[allow(dead_code)]
    pub max_files: Option<u32>,
    #[allow(dead_code)]
    pub max_file_size: Option<u64>,
}

impl LoggingConfig {
    pub fn stdout_level(&self) -> &str {
        self.stdout
            .as_deref()
            .or(self.level.as_deref())
            .unwrap_or("INFO")
    }

    pub fn file_level(&self) -> &str {
        self.level
            .as_deref()
            .or(self.stdout.as_deref())
            .unwrap_or("INFO")
    }
}

#[derive(Debug, Deserialize)]
struct MySqlServerSection {
    host: String,
    #[serde(default = "default_mysql_port")]
    port: u16,
    username: String,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostgresServerSection {
    host: String,
    #[serde(default = "default_pg_port")]
    port: u16,
    username: String,
    password: Option<String>,
    database: Option<String>,
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_pg_port() -> u16 {
    5432
}

#[derive(Debug, Default, Deserialize)]
struct ReplicationSection {
    server_id: Option<u32>,
    binlog_file: Option<String>,
    binlog_position: Option<u64>,
    slot_name: Option<String>,
    publication_name: Option<String>,
    start_lsn: Option<String>,
    #[serde(default)]
    save_last_position: bool,
    #[serde(default)]
    save_position_event_count: u64,
    checkpoint_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CaptureSection {
    #[serde(default)]
    databases: Vec<HashMap<String, DatabaseSpec>>,
    #[serde(default)]
    schemas: Vec<HashMap<String, DatabaseSpec>>,
}

#[derive(Debug, Deserialize)]
struct DatabaseSpec {
    #[serde(default = "default_true")]
    capture_dml: bool,
    #[serde(default = "default_true")]
    capture_ddl: bool,
    #[serde(default)]
    tables: Vec<HashMap<String, TableSpec>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct TableSpec {
    primary_key: Option<PrimaryKeySpec>,
    columns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PrimaryKeySpec {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct PublisherEntry {
    plugin: Option<PluginSpec>,
}

#[derive(Debug, Deserialize)]
struct PluginSpec {
    name: String,
    library_path: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
    max_queue_depth: Option<usize>,
    publish_databases: Option<Vec<String>>,
    publish_schemas: Option<Vec<String>>,
    #[serde(default)]
    config: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    logging: LoggingConfig,
    master_server: Option<MySqlServerSection>,
    postgres_server: Option<PostgresServerSection>,
    #[serde(default)]
    replication: ReplicationSection,
    #[serde(default)]
    capture: CaptureSection,
    #[serde(default)]
    publishers: Vec<PublisherEntry>,
}

/// Which source dialect this daemon instance replicates.
#[derive(Debug)]
pub enum SourceSettings {
    MySql(MySqlSourceConfig),
    Postgres(PostgresSourceConfig),
}

/// The fully resolved daemon configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub source: SourceSettings,
    pub policy: CapturePolicy,
    pub sinks: Vec<SinkConfig>,
}

/// Load and resolve the configuration file.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CdcError::config(format!("cannot read {}: {e}", path.display())))?;
    let raw: RawConfig = serde_json::from_str(&text)
        .map_err(|e| CdcError::config(format!("cannot parse {}: {e}", path.display())))?;
    resolve(raw)
}

fn resolve(raw: RawConfig) -> Result<AppConfig> {
    let source = match (raw.master_server, raw.postgres_server) {
        (Some(mysql), None) => SourceSettings::MySql(resolve_mysql(mysql, &raw.replication)?),
        (None, Some(pg)) => SourceSettings::Postgres(resolve_postgres(pg, &raw.replication)?),
        (Some(_), Some(_)) => {
            return Err(CdcError::config(
                "configure either master_server or postgres_server, not both",
            ))
        }
        (None, None) => {
            return Err(CdcError::config(
                "one of master_server or postgres_server is required",
            ))
        }
    };

    let policy = resolve_capture(raw.capture);
    let sinks = raw
        .publishers
        .into_iter()
        .filter_map(|entry| entry.plugin)
        .map(resolve_sink)
        .collect();

    Ok(AppConfig {
        logging: raw.logging,
        source,
        policy,
        sinks,
    })
}

fn resolve_mysql(
    server: MySqlServerSection,
    replication: &ReplicationSection,
) -> Result<MySqlSourceConfig> {
    let binlog_file = replication
        .binlog_file
        .clone()
        .filter(|f| !f.is_empty() && f != "current");
    Ok(MySqlSourceConfig {
        host: server.host,
        port: server.port,
        username: server.username,
        password: server.password,
        server_id: replication.server_id.unwrap_or(1),
        binlog_file,
        binlog_position: replication.binlog_position.unwrap_or(4),
        save_last_position: replication.save_last_position,
        save_position_event_count: replication.save_position_event_count,
        checkpoint_file: PathBuf::from(
            replication
                .checkpoint_file
                .clone()
                .unwrap_or_else(|| DEFAULT_MYSQL_CHECKPOINT.to_string()),
        ),
    })
}

fn resolve_postgres(
    server: PostgresServerSection,
    replication: &ReplicationSection,
) -> Result<PostgresSourceConfig> {
    let start_lsn = match replication.start_lsn.as_deref() {
        None | Some("") | Some("current") => None,
        Some(text) => Some(text.parse::<Lsn>().map_err(|_| {
            CdcError::config(format!("invalid start_lsn: {text} (expected HI/LO hex)"))
        })?),
    };
    Ok(PostgresSourceConfig {
        host: server.host,
        port: server.port,
        username: server.username,
        password: server.password,
        database: server.database.unwrap_or_else(|| "postgres".to_string()),
        slot_name: replication
            .slot_name
            .clone()
            .unwrap_or_else(|| "tapline_slot".to_string()),
        publication_name: replication
            .publication_name
            .clone()
            .unwrap_or_else(|| "tapline_publication".to_string()),
        start_lsn,
        save_last_position: replication.save_last_position,
        save_position_event_count: replication.save_position_event_count,
        checkpoint_file: PathBuf::from(
            replication
                .checkpoint_file
                .clone()
                .unwrap_or_else(|| DEFAULT_PG_CHECKPOINT.to_string()),
        ),
    })
}

fn resolve_capture(capture: CaptureSection) -> CapturePolicy {
    let entries = if !capture.databases.is_empty() {
        capture.databases
    } else {
        capture.schemas
    };

    let mut databases = Vec::new();
    for entry in entries {
        for (name, spec) in entry {
            let mut tables = Vec::new();
            for table_entry in spec.tables {
                for (table_name, table_spec) in table_entry {
                    tables.push(resolve_table(table_name, table_spec));
                }
            }
            databases.push(DatabaseCapture {
                name,
                capture_dml: spec.capture_dml,
                capture_ddl: spec.capture_ddl,
                tables,
            });
        }
    }
    CapturePolicy { databases }
}

fn resolve_table(name: String, spec: TableSpec) -> TableCapture {
    let primary_key = match spec.primary_key {
        Some(PrimaryKeySpec::One(key)) => vec![key],
        Some(PrimaryKeySpec::Many(keys)) => keys,
        None => Vec::new(),
    };
    let columns = match spec.columns {
        Some(cols) if cols.len() == 1 && cols[0] == "*" => CaptureColumns::All,
        Some(cols) => CaptureColumns::Named(cols),
        None => CaptureColumns::All,
    };
    TableCapture {
        name,
        primary_key,
        columns,
    }
}

fn resolve_sink(plugin: PluginSpec) -> SinkConfig {
    let schemas = plugin
        .publish_databases
        .or(plugin.publish_schemas)
        .unwrap_or_default();

    // Option values are handed to sinks as strings, whatever their JSON type.
    let options = plugin
        .config
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect();

    SinkConfig {
        name: plugin.name,
        library_path: plugin.library_path,
        active: plugin.active,
        schemas,
        max_queue_depth: plugin.max_queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
        options,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<AppConfig> {
        let raw: RawConfig = serde_json::from_str(text).unwrap();
        resolve(raw)
    }

    #[test]
    fn test_full_mysql_config() {
        let config = parse(
            r#"{
                "logging": {"level": "DEBUG", "stdout": "INFO", "log_file": "/var/log/tapline.log"},
                "master_server": {"host": "db1", "port": 3307, "username": "repl", "password": "pw"},
                "replication": {
                    "server_id": 42,
                    "binlog_file": "mysql-bin.000003",
                    "binlog_position": 1534,
                    "save_last_position": true,
                    "save_position_event_count": 100,
                    "checkpoint_file": "/var/lib/tapline/binlog.ckpt"
                },
                "capture": {
                    "databases": [
                        {"testdb": {
                            "capture_dml": true,
                            "capture_ddl": false,
                            "tables": [
                                {"users": {"primary_key": ["id"], "columns": ["*"]}},
                                {"accounts": {"primary_key": "id", "columns": ["id", "balance"]}}
                            ]
                        }}
                    ]
                },
                "publishers": [
                    {"plugin": {
                        "name": "file",
                        "library_path": "./sinks/file.so",
                        "active": true,
                        "max_queue_depth": 64,
                        "publish_databases": ["testdb"],
                        "config": {"path": "/tmp/events.jsonl", "flush_every": 8}
                    }}
                ]
            }"#,
        )
        .unwrap();

        let mysql = match &config.source {
            SourceSettings::MySql(mysql) => mysql,
            other => panic!("expected mysql source, got {other:?}"),
        };
        assert_eq!(mysql.host, "db1");
        assert_eq!(mysql.port, 3307);
        assert_eq!(mysql.server_id, 42);
        assert_eq!(mysql.binlog_file.as_deref(), Some("mysql-bin.000003"));
        assert!(mysql.save_last_position);

        assert!(config.policy.captures_table("testdb", "users"));
        assert!(!config.policy.captures_ddl("testdb"));
        let accounts = config.policy.table("testdb", "accounts").unwrap();
        assert_eq!(accounts.primary_key, vec!["id"]);
        assert_eq!(
            accounts.columns,
            CaptureColumns::Named(vec!["id".into(), "balance".into()])
        );

        assert_eq!(config.sinks.len(), 1);
        let sink = &config.sinks[0];
        assert_eq!(sink.name, "file");
        assert_eq!(sink.max_queue_depth, 64);
        assert_eq!(sink.schemas, vec!["testdb"]);
        assert_eq!(sink.opt_str("path"), Some("/tmp/events.jsonl"));
        // Non-string option values arrive as their text form.
        assert_eq!(sink.opt_i64("flush_every", 0), 8);

        assert_eq!(config.logging.stdout_level(), "INFO");
        assert_eq!(config.logging.file_level(), "DEBUG");
    }

    #[test]
    fn test_postgres_config_with_schemas() {
        let config = parse(
            r#"{
                "postgres_server": {"host": "pg1", "username": "repl", "password": "pw", "database": "shop"},
                "replication": {
                    "slot_name": "shop_slot",
                    "publication_name": "shop_pub",
                    "start_lsn": "0/2000",
                    "save_last_position": true
                },
                "capture": {
                    "schemas": [
                        {"public": {"tables": [{"users": {"columns": ["*"]}}]}}
                    ]
                },
                "publishers": [
                    {"plugin": {"name": "webhook", "publish_schemas": ["public"],
                                "config": {"url": "http://hook.local/events"}}}
                ]
            }"#,
        )
        .unwrap();

        let pg = match &config.source {
            SourceSettings::Postgres(pg) => pg,
            other => panic!("expected postgres source, got {other:?}"),
        };
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.database, "shop");
        assert_eq!(pg.slot_name, "shop_slot");
        assert_eq!(pg.start_lsn, Some(Lsn(0x2000)));
        assert!(config.policy.captures_table("public", "users"));
        assert_eq!(config.sinks[0].schemas, vec!["public"]);
    }

    #[test]
    fn test_start_lsn_current_means_none() {
        let config = parse(
            r#"{
                "postgres_server": {"host": "pg1", "username": "r"},
                "replication": {"start_lsn": "current"}
            }"#,
        )
        .unwrap();
        match config.source {
            SourceSettings::Postgres(pg) => assert_eq!(pg.start_lsn, None),
            other => panic!("expected postgres source, got {other:?}"),
        }
    }

    #[test]
    fn test_exactly_one_source_required() {
        assert!(parse(r#"{}"#).is_err());
        assert!(parse(
            r#"{
                "master_server": {"host": "a", "username": "u"},
                "postgres_server": {"host": "b", "username": "u"}
            }"#
        )
        .is_err());
    }

    #[test]
    fn test_defaults() {
        let config = parse(
            r#"{"master_server": {"host": "db", "username": "repl"}}"#,
        )
        .unwrap();
        match config.source {
            SourceSettings::MySql(mysql) => {
                assert_eq!(mysql.port, 3306);
                assert_eq!(mysql.server_id, 1);
                assert_eq!(mysql.binlog_position, 4);
                assert!(!mysql.save_last_position);
                assert_eq!(
                    mysql.checkpoint_file,
                    PathBuf::from(DEFAULT_MYSQL_CHECKPOINT)
                );
            }
            other => panic!("expected mysql source, got {other:?}"),
        }
        assert!(config.policy.databases.is_empty());
        assert!(config.sinks.is_empty());
    }

    #[test]
    fn test_binlog_file_current_means_unset() {
        let config = parse(
            r#"{
                "master_server": {"host": "db", "username": "r"},
                "replication": {"binlog_file": "current"}
            }"#,
        )
        .unwrap();
        match config.source {
            SourceSettings::MySql(mysql) => assert_eq!(mysql.binlog_file, None),
            other => panic!("expected mysql source, got {other:?}"),
        }
    }

    #[test]
    fn test_inactive_publisher_carried_through() {
        let config = parse(
            r#"{
                "master_server": {"host": "db", "username": "r"},
                "publishers": [
                    {"plugin": {"name": "console", "active": false}},
                    {"plugin": {"name": "console"}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.sinks.len(), 2);
        assert!(!config.sinks[0].active);
        assert!(config.sinks[1].active);
    }
}
