//! PostgreSQL replication client
//!
//! Low-level TCP client for the replication protocol: startup with
//! `replication=database`, cleartext and MD5 authentication, simple queries
//! with row results (slot lookups, `pg_current_wal_lsn()`), replication
//! slot creation, and the CopyBoth stream with standby status updates.

use anyhow::{anyhow, bail, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use postgres_protocol::message::{backend, frontend};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::common::{Lsn, CONNECTION_TIMEOUT_SECS};

/// Reject identifiers that could smuggle SQL into replication commands.
fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        bail!("invalid identifier length: {name:?}");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!("invalid identifier: {name:?}");
    }
    Ok(())
}

/// PostgreSQL replication client.
pub struct ReplicationClient {
    stream: BufReader<TcpStream>,
}

impl ReplicationClient {
    /// Connect to PostgreSQL in replication mode.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        database: &str,
        password: Option<&str>,
    ) -> Result<Self> {
        info!(host, port, user, database, "connecting to PostgreSQL");

        let tcp = match timeout(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            TcpStream::connect((host, port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e).context("failed to connect to PostgreSQL"),
            Err(_) => bail!("connection timeout after {CONNECTION_TIMEOUT_SECS}s"),
        };
        let mut stream = BufReader::new(tcp);

        let params = vec![
            ("user", user),
            ("database", database),
            ("replication", "database"),
        ];
        let mut buf = BytesMut::new();
        frontend::startup_message(params.into_iter(), &mut buf)?;
        stream.write_all(&buf).await?;
        stream.flush().await?;

        // Authentication exchange.
        loop {
            let (type_code, body) = read_backend_message(&mut stream).await?;

            let mut raw = BytesMut::with_capacity(1 + 4 + body.len());
            raw.put_u8(type_code);
            raw.put_i32((body.len() + 4) as i32);
            raw.put_slice(&body);

            let msg = backend::Message::parse(&mut raw)?
                .ok_or_else(|| anyhow!("failed to parse auth message"))?;

            match msg {
                backend::Message::AuthenticationOk => {
                    debug!("authentication successful");
                    break;
                }
                backend::Message::AuthenticationCleartextPassword => {
                    let pass = password.ok_or_else(|| anyhow!("password required"))?;
                    let mut buf = BytesMut::new();
                    frontend::password_message(pass.as_bytes(), &mut buf)?;
                    stream.write_all(&buf).await?;
                    stream.flush().await?;
                }
                backend::Message::AuthenticationMd5Password(body) => {
                    let pass = password.ok_or_else(|| anyhow!("password required"))?;
                    let hash = hash_md5_password(user, pass, &body.salt());
                    let mut buf = BytesMut::new();
                    frontend::password_message(hash.as_bytes(), &mut buf)?;
                    stream.write_all(&buf).await?;
                    stream.flush().await?;
                }
                backend::Message::AuthenticationSasl(_) => {
                    bail!("SASL authentication not supported; use md5 or password auth")
                }
                backend::Message::ErrorResponse(_) => {
                    bail!("authentication rejected by server")
                }
                _ => bail!("unexpected message during auth: {type_code}"),
            }
        }

        // Drain parameter status until ReadyForQuery.
        loop {
            let (type_code, _body) = read_backend_message(&mut stream).await?;
            match type_code {
                b'Z' => break,
                b'E' => bail!("error while waiting for ready"),
                _ => {}
            }
        }

        Ok(Self { stream })
    }

    /// Run a simple query and collect the text rows.
    pub async fn simple_query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let mut buf = BytesMut::new();
        frontend::query(sql, &mut buf)?;
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;

        let mut rows = Vec::new();
        loop {
            let (type_code, body) = read_backend_message(&mut self.stream).await?;
            match type_code {
                b'D' => rows.push(parse_data_row(&body)?),
                b'T' | b'C' | b'N' | b'S' => {}
                b'Z' => break,
                b'E' => bail!("query failed: {}", error_message(&body)),
                other => {
                    let message = other as char;
                    debug!(message = %message, "ignoring backend message");
                }
            }
        }
        Ok(rows)
    }

    /// The slot's `confirmed_flush_lsn`, or `None` when the slot does not
    /// exist or has never confirmed anything.
    pub async fn confirmed_flush_lsn(&mut self, slot_name: &str) -> Result<Option<Lsn>> {
        validate_identifier(slot_name)?;
        let rows = self
            .simple_query(&format!(
                "SELECT confirmed_flush_lsn FROM pg_replication_slots WHERE slot_name = '{slot_name}'"
            ))
            .await?;
        let Some(first) = rows.into_iter().next() else {
            return Ok(None);
        };
        match first.into_iter().next().flatten() {
            Some(text) => Ok(Some(text.parse().map_err(|_| {
                anyhow!("cannot parse confirmed_flush_lsn: {text}")
            })?)),
            None => Ok(None),
        }
    }

    /// The server's current WAL write position.
    pub async fn current_wal_lsn(&mut self) -> Result<Lsn> {
        let rows = self.simple_query("SELECT pg_current_wal_lsn()").await?;
        let text = rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next().flatten())
            .ok_or_else(|| anyhow!("pg_current_wal_lsn returned nothing"))?;
        text.parse()
            .map_err(|_| anyhow!("cannot parse pg_current_wal_lsn: {text}"))
    }

    /// Create a logical replication slot with the pgoutput plugin.
    pub async fn create_replication_slot(&mut self, slot_name: &str) -> Result<()> {
        validate_identifier(slot_name)?;
        info!(slot = %slot_name, "creating replication slot");
        self.simple_query(&format!(
            "CREATE_REPLICATION_SLOT {slot_name} LOGICAL pgoutput"
        ))
        .await?;
        Ok(())
    }

    /// Start streaming and enter CopyBoth mode.
    pub async fn start_replication(
        mut self,
        slot_name: &str,
        start_lsn: Lsn,
        publication: &str,
    ) -> Result<ReplicationStream> {
        validate_identifier(slot_name)?;
        validate_identifier(publication)?;

        let query = format!(
            "START_REPLICATION SLOT {slot_name} LOGICAL {start_lsn} (proto_version '1', publication_names '{publication}')"
        );

        let mut buf = BytesMut::new();
        frontend::query(&query, &mut buf)?;
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;

        loop {
            let (type_code, body) = read_backend_message(&mut self.stream).await?;
            match type_code {
                b'W' => {
                    info!(slot = %slot_name, lsn = %start_lsn, "entered CopyBoth mode");
                    return Ok(ReplicationStream {
                        stream: self.stream,
                    });
                }
                b'E' => bail!("could not start replication: {}", error_message(&body)),
                b'N' => {}
                other => bail!(
                    "unexpected response to START_REPLICATION: {}",
                    other as char
                ),
            }
        }
    }
}

/// CopyBoth stream carrying XLogData and keepalive frames.
pub struct ReplicationStream {
    stream: BufReader<TcpStream>,
}

impl ReplicationStream {
    /// Next CopyData payload.
    ///
    /// Returns `Ok(Some(bytes))` with the raw payload, `Ok(None)` when the
    /// server ends the copy stream.
    pub async fn next_message(&mut self) -> Result<Option<Bytes>> {
        let (type_code, body) = read_backend_message(&mut self.stream).await?;
        match type_code {
            b'd' => Ok(Some(Bytes::from(body))),
            b'c' => Ok(None),
            b'E' => bail!("replication error: {}", error_message(&body)),
            other => {
                let message = other as char;
                warn!(message = %message, "unexpected message in copy stream");
                Ok(None)
            }
        }
    }

    /// Send a standby status update: 34 bytes of
    /// `r | write | flush | apply | timestamp | reply_requested`, with the
    /// timestamp in Postgres-epoch microseconds, then flush the socket.
    pub async fn send_status_update(&mut self, lsn: Lsn) -> Result<()> {
        let mut payload = BytesMut::with_capacity(34);
        payload.put_u8(b'r');
        payload.put_u64(lsn.as_u64());
        payload.put_u64(lsn.as_u64());
        payload.put_u64(lsn.as_u64());
        payload.put_i64(postgres_epoch_micros());
        payload.put_u8(0);

        let mut frame = BytesMut::with_capacity(1 + 4 + payload.len());
        frame.put_u8(b'd');
        frame.put_i32((payload.len() + 4) as i32);
        frame.put_slice(&payload);

        self.stream.get_mut().write_all(&frame).await?;
        self.stream.get_mut().flush().await?;
        debug!(lsn = %lsn, "status update sent");
        Ok(())
    }
}

/// Microseconds since the Postgres epoch (2000-01-01 00:00:00 UTC).
fn postgres_epoch_micros() -> i64 {
    let pg_epoch = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(946_684_800);
    std::time::SystemTime::now()
        .duration_since(pg_epoch)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

async fn read_backend_message(stream: &mut BufReader<TcpStream>) -> Result<(u8, Vec<u8>)> {
    let type_code = stream.read_u8().await.context("failed to read type")?;
    let len = stream.read_i32().await.context("failed to read length")? as usize;
    if len < 4 {
        bail!("invalid message length: {len}");
    }
    let mut body = vec![0u8; len - 4];
    stream
        .read_exact(&mut body)
        .await
        .context("failed to read body")?;
    Ok((type_code, body))
}

/// Text columns of one DataRow message.
fn parse_data_row(body: &[u8]) -> Result<Vec<Option<String>>> {
    use bytes::Buf;
    let mut cursor = std::io::Cursor::new(body);
    if cursor.remaining() < 2 {
        bail!("data row too short");
    }
    let column_count = cursor.get_u16();
    let mut columns = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        if cursor.remaining() < 4 {
            bail!("data row truncated");
        }
        let len = cursor.get_i32();
        if len < 0 {
            columns.push(None);
        } else {
            let len = len as usize;
            if cursor.remaining() < len {
                bail!("data row truncated");
            }
            let mut value = vec![0u8; len];
            std::io::Read::read_exact(&mut cursor, &mut value)?;
            columns.push(Some(String::from_utf8_lossy(&value).to_string()));
        }
    }
    Ok(columns)
}

/// Human-readable part of an ErrorResponse body.
fn error_message(body: &[u8]) -> String {
    // Fields are (type byte, cstring) pairs; 'M' carries the message.
    let mut i = 0;
    while i < body.len() && body[i] != 0 {
        let field = body[i];
        i += 1;
        let start = i;
        while i < body.len() && body[i] != 0 {
            i += 1;
        }
        if field == b'M' {
            return String::from_utf8_lossy(&body[start..i]).to_string();
        }
        i += 1;
    }
    "unknown server error".to_string()
}

fn hash_md5_password(user: &str, pass: &str, salt: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(pass);
    hasher.update(user);
    let first = hex::encode(hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(first);
    hasher.update(salt);
    format!("md5{}", hex::encode(hasher.finalize()))
}
