//! pgoutput decoder
//!
//! Decodes the logical replication messages carried inside XLogData frames:
//! Begin, Commit, Origin, Relation, Type, Insert, Update, Delete and
//! Truncate. Tuple columns arrive as `n` (null), `u` (unchanged TOAST,
//! elided downstream) or `t` (text with a 4-byte length).

use bytes::{Buf, Bytes};
use thiserror::Error;

/// Decoder errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Not enough data")]
    NotEnoughData,
    #[error("Invalid message type: {0}")]
    InvalidType(u8),
    #[error("UTF8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone)]
pub struct BeginBody {
    pub final_lsn: u64,
    pub timestamp: i64,
    pub xid: u32,
}

#[derive(Debug, Clone)]
pub struct CommitBody {
    pub flags: u8,
    pub commit_lsn: u64,
    pub end_lsn: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct Column {
    /// Bit 0 set when the column is part of the replica identity key.
    pub flags: u8,
    pub name: String,
    pub type_id: i32,
    pub type_modifier: i32,
}

#[derive(Debug, Clone)]
pub struct RelationBody {
    pub id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: u8,
    pub columns: Vec<Column>,
}

/// One tuple column.
#[derive(Debug, Clone, PartialEq)]
pub enum TupleData {
    Null,
    /// Unchanged TOAST value; the column is not included in the event.
    Toast,
    Text(Bytes),
}

/// One tuple, columns in relation order.
#[derive(Debug, Clone)]
pub struct Tuple(pub Vec<TupleData>);

#[derive(Debug, Clone)]
pub struct InsertBody {
    pub relation_id: u32,
    pub tuple: Tuple,
}

#[derive(Debug, Clone)]
pub struct UpdateBody {
    pub relation_id: u32,
    /// Old image, present with REPLICA IDENTITY FULL (`O`) or a key-only
    /// image (`K`).
    pub old_tuple: Option<Tuple>,
    pub new_tuple: Tuple,
}

#[derive(Debug, Clone)]
pub struct DeleteBody {
    pub relation_id: u32,
    pub old_tuple: Option<Tuple>,
}

#[derive(Debug, Clone)]
pub struct TruncateBody {
    pub options: u8,
    pub relation_ids: Vec<u32>,
}

/// A decoded pgoutput message.
#[derive(Debug, Clone)]
pub enum ReplicationMessage {
    Begin(BeginBody),
    Commit(CommitBody),
    Relation(RelationBody),
    Insert(InsertBody),
    Update(UpdateBody),
    Delete(DeleteBody),
    Truncate(TruncateBody),
    /// Origin, Type and Message frames: carried but not acted on.
    Other(u8),
}

/// pgoutput decoder
pub struct PgOutputDecoder;

impl PgOutputDecoder {
    /// Decode one pgoutput message.
    pub fn decode(data: &mut Bytes) -> Result<ReplicationMessage, DecodeError> {
        if !data.has_remaining() {
            return Err(DecodeError::NotEnoughData);
        }

        let msg_type = data.get_u8();
        match msg_type {
            b'B' => Self::decode_begin(data).map(ReplicationMessage::Begin),
            b'C' => Self::decode_commit(data).map(ReplicationMessage::Commit),
            b'R' => Self::decode_relation(data).map(ReplicationMessage::Relation),
            b'I' => Self::decode_insert(data).map(ReplicationMessage::Insert),
            b'U' => Self::decode_update(data).map(ReplicationMessage::Update),
            b'D' => Self::decode_delete(data).map(ReplicationMessage::Delete),
            b'T' => Self::decode_truncate(data).map(ReplicationMessage::Truncate),
            b'O' | b'Y' | b'M' => Ok(ReplicationMessage::Other(msg_type)),
            t => Err(DecodeError::InvalidType(t)),
        }
    }

    fn decode_begin(buf: &mut Bytes) -> Result<BeginBody, DecodeError> {
        need(buf, 20)?;
        Ok(BeginBody {
            final_lsn: buf.get_u64(),
            timestamp: buf.get_i64(),
            xid: buf.get_u32(),
        })
    }

    fn decode_commit(buf: &mut Bytes) -> Result<CommitBody, DecodeError> {
        need(buf, 25)?;
        Ok(CommitBody {
            flags: buf.get_u8(),
            commit_lsn: buf.get_u64(),
            end_lsn: buf.get_u64(),
            timestamp: buf.get_i64(),
        })
    }

    fn decode_relation(buf: &mut Bytes) -> Result<RelationBody, DecodeError> {
        need(buf, 4)?;
        let id = buf.get_u32();
        let namespace = read_string(buf)?;
        let name = read_string(buf)?;
        need(buf, 3)?;
        let replica_identity = buf.get_u8();
        let column_count = buf.get_u16();

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            need(buf, 1)?;
            let flags = buf.get_u8();
            let col_name = read_string(buf)?;
            need(buf, 8)?;
            columns.push(Column {
                flags,
                name: col_name,
                type_id: buf.get_i32(),
                type_modifier: buf.get_i32(),
            });
        }

        Ok(RelationBody {
            id,
            namespace,
            name,
            replica_identity,
            columns,
        })
    }

    fn decode_insert(buf: &mut Bytes) -> Result<InsertBody, DecodeError> {
        need(buf, 5)?;
        let relation_id = buf.get_u32();
        let marker = buf.get_u8();
        if marker != b'N' {
            return Err(DecodeError::Protocol(format!(
                "expected N for the new tuple, got {}",
                marker as char
            )));
        }
        Ok(InsertBody {
            relation_id,
            tuple: decode_tuple(buf)?,
        })
    }

    fn decode_update(buf: &mut Bytes) -> Result<UpdateBody, DecodeError> {
        need(buf, 5)?;
        let relation_id = buf.get_u32();
        let marker = buf.get_u8();

        let (old_tuple, new_tuple) = match marker {
            b'K' | b'O' => {
                let old = decode_tuple(buf)?;
                need(buf, 1)?;
                let next = buf.get_u8();
                if next != b'N' {
                    return Err(DecodeError::Protocol(format!(
                        "expected N after the old image, got {}",
                        next as char
                    )));
                }
                (Some(old), decode_tuple(buf)?)
            }
            b'N' => (None, decode_tuple(buf)?),
            t => return Err(DecodeError::InvalidType(t)),
        };

        Ok(UpdateBody {
            relation_id,
            old_tuple,
            new_tuple,
        })
    }

    fn decode_delete(buf: &mut Bytes) -> Result<DeleteBody, DecodeError> {
        need(buf, 5)?;
        let relation_id = buf.get_u32();
        let marker = buf.get_u8();
        let old_tuple = match marker {
            b'K' | b'O' => Some(decode_tuple(buf)?),
            t => return Err(DecodeError::InvalidType(t)),
        };
        Ok(DeleteBody {
            relation_id,
            old_tuple,
        })
    }

    fn decode_truncate(buf: &mut Bytes) -> Result<TruncateBody, DecodeError> {
        need(buf, 5)?;
        let count = buf.get_u32();
        let options = buf.get_u8();
        let mut relation_ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            need(buf, 4)?;
            relation_ids.push(buf.get_u32());
        }
        Ok(TruncateBody {
            options,
            relation_ids,
        })
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        Err(DecodeError::NotEnoughData)
    } else {
        Ok(())
    }
}

fn read_string(buf: &mut Bytes) -> Result<String, DecodeError> {
    let n = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::NotEnoughData)?;
    let bytes = buf.copy_to_bytes(n);
    buf.advance(1);
    Ok(std::str::from_utf8(&bytes)?.to_string())
}

fn decode_tuple(buf: &mut Bytes) -> Result<Tuple, DecodeError> {
    need(buf, 2)?;
    let column_count = buf.get_u16();
    let mut columns = Vec::with_capacity(column_count as usize);

    for _ in 0..column_count {
        need(buf, 1)?;
        let code = buf.get_u8();
        let data = match code {
            b'n' => TupleData::Null,
            b'u' => TupleData::Toast,
            b't' => {
                need(buf, 4)?;
                let len = buf.get_u32() as usize;
                need(buf, len)?;
                TupleData::Text(buf.copy_to_bytes(len))
            }
            t => return Err(DecodeError::InvalidType(t)),
        };
        columns.push(data);
    }

    Ok(Tuple(columns))
}
