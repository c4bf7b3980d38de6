//! MySQL binlog event decoder
//!
//! Decodes the binlog events a row-based replica sees:
//!
//! - FORMAT_DESCRIPTION_EVENT
//! - ROTATE_EVENT
//! - QUERY_EVENT
//! - XID_EVENT
//! - TABLE_MAP_EVENT
//! - WRITE/UPDATE/DELETE_ROWS (v1 and v2)
//! - the MariaDB zlib-compressed rows variants
//!
//! Row values are decoded type-directed from the TABLE_MAP numeric types and
//! metadata. Columns outside the registered projection are byte-skipped
//! without being materialized. The per-row null bitmap is sized by the
//! number of columns marked present in the image's column bitmap, not by the
//! total column count.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use anyhow::{bail, Context, Result};
use bytes::{Buf, Bytes};
use tracing::{debug, trace, warn};

/// Binlog event type codes.
pub mod event_type {
    pub const QUERY: u8 = 2;
    pub const ROTATE: u8 = 4;
    pub const FORMAT_DESCRIPTION: u8 = 15;
    pub const XID: u8 = 16;
    pub const TABLE_MAP: u8 = 19;
    pub const WRITE_ROWS_V1: u8 = 23;
    pub const UPDATE_ROWS_V1: u8 = 24;
    pub const DELETE_ROWS_V1: u8 = 25;
    pub const HEARTBEAT: u8 = 27;
    pub const WRITE_ROWS_V2: u8 = 30;
    pub const UPDATE_ROWS_V2: u8 = 31;
    pub const DELETE_ROWS_V2: u8 = 32;
    pub const MARIA_GTID: u8 = 162;
    pub const MARIA_WRITE_ROWS_COMPRESSED: u8 = 166;
    pub const MARIA_UPDATE_ROWS_COMPRESSED: u8 = 167;
    pub const MARIA_DELETE_ROWS_COMPRESSED: u8 = 168;
}

/// MySQL column type codes as they appear in TABLE_MAP.
pub mod column_type {
    pub const DECIMAL: u8 = 0;
    pub const TINY: u8 = 1;
    pub const SHORT: u8 = 2;
    pub const LONG: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const NULL: u8 = 6;
    pub const TIMESTAMP: u8 = 7;
    pub const LONGLONG: u8 = 8;
    pub const INT24: u8 = 9;
    pub const DATE: u8 = 10;
    pub const TIME: u8 = 11;
    pub const DATETIME: u8 = 12;
    pub const YEAR: u8 = 13;
    pub const NEWDATE: u8 = 14;
    pub const VARCHAR: u8 = 15;
    pub const BIT: u8 = 16;
    pub const TIMESTAMP2: u8 = 17;
    pub const DATETIME2: u8 = 18;
    pub const TIME2: u8 = 19;
    pub const JSON: u8 = 245;
    pub const NEWDECIMAL: u8 = 246;
    pub const ENUM: u8 = 247;
    pub const SET: u8 = 248;
    pub const TINY_BLOB: u8 = 249;
    pub const MEDIUM_BLOB: u8 = 250;
    pub const LONG_BLOB: u8 = 251;
    pub const BLOB: u8 = 252;
    pub const VAR_STRING: u8 = 253;
    pub const STRING: u8 = 254;
    pub const GEOMETRY: u8 = 255;
}

/// Common 19-byte event header.
#[derive(Debug, Clone)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: u8,
    pub server_id: u32,
    pub event_length: u32,
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub const SIZE: usize = 19;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("event header too short: {} bytes", data.len());
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            timestamp: cursor.get_u32_le(),
            event_type: cursor.get_u8(),
            server_id: cursor.get_u32_le(),
            event_length: cursor.get_u32_le(),
            next_position: cursor.get_u32_le(),
            flags: cursor.get_u16_le(),
        })
    }
}

/// Table descriptor announced by TABLE_MAP.
#[derive(Debug, Clone)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub schema_name: String,
    pub table_name: String,
    pub column_count: usize,
    /// Types as written in the event.
    pub column_types: Vec<u8>,
    /// Types after the MT_STRING metadata fixup (ENUM/SET surface here).
    pub real_types: Vec<u8>,
    pub column_metadata: Vec<u16>,
}

/// One decoded row. Projected columns only, as `(wire index, value)` pairs
/// in wire order.
#[derive(Debug, Clone, Default)]
pub struct RowData {
    pub before: Option<Vec<(usize, ColumnValue)>>,
    pub after: Option<Vec<(usize, ColumnValue)>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsKind {
    Write,
    Update,
    Delete,
}

/// A decoded rows event. `captured` is false when the table is not in the
/// capture set; its rows are then left unparsed.
#[derive(Debug, Clone)]
pub struct RowsEvent {
    pub table_id: u64,
    pub kind: RowsKind,
    pub captured: bool,
    pub rows: Vec<RowData>,
}

#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub schema: String,
    pub query: String,
}

/// Decoded binlog event.
#[derive(Debug, Clone)]
pub enum BinlogEvent {
    FormatDescription {
        binlog_version: u16,
        server_version: String,
    },
    Rotate {
        position: u64,
        next_file: String,
    },
    TableMap(TableMapEvent),
    Rows(RowsEvent),
    Query(QueryEvent),
    Xid {
        xid: u64,
    },
    Heartbeat,
    Ignored(u8),
}

/// Decoded event plus its header.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub header: EventHeader,
    pub event: BinlogEvent,
}

/// One decoded column value, before JSON shaping.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    SignedInt(i64),
    Float(f32),
    Double(f64),
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Date {
        year: u16,
        month: u8,
        day: u8,
    },
    Time {
        negative: bool,
        hours: u16,
        minutes: u8,
        seconds: u8,
        microseconds: u32,
    },
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        microseconds: u32,
    },
    Timestamp(u32),
    Year(u16),
    /// Raw JSON column payload; shaped to its text form downstream.
    Json(Vec<u8>),
    /// 1-based ordinal into the enum's label list.
    Enum(u16),
    /// SET bitfield.
    Set(u64),
    Bit(u64),
}

struct CachedTable {
    map: TableMapEvent,
    /// Projected wire-column indices, ascending. `None` until the source
    /// registers the table as captured.
    projection: Option<Vec<usize>>,
}

/// Binlog decoder with the per-connection table-map cache.
pub struct BinlogDecoder {
    checksum: bool,
    tables: HashMap<u64, CachedTable>,
}

impl BinlogDecoder {
    pub fn new(checksum: bool) -> Self {
        Self {
            checksum,
            tables: HashMap::new(),
        }
    }

    /// Register the projection for a mapped table. `None` marks the table
    /// as not captured; its row events decode to empty, unparsed events.
    pub fn set_projection(&mut self, table_id: u64, projection: Option<Vec<usize>>) {
        if let Some(entry) = self.tables.get_mut(&table_id) {
            entry.projection = projection;
        }
    }

    pub fn table_map(&self, table_id: u64) -> Option<&TableMapEvent> {
        self.tables.get(&table_id).map(|t| &t.map)
    }

    /// Decode one raw event (header included, checksum still attached).
    pub fn decode(&mut self, data: &Bytes) -> Result<DecodedEvent> {
        let header = EventHeader::parse(data)?;
        let mut payload = &data[EventHeader::SIZE..];
        if self.checksum && payload.len() >= 4 {
            payload = &payload[..payload.len() - 4];
        }

        trace!(
            event_type = header.event_type,
            len = payload.len(),
            "decoding binlog event"
        );

        let event = match header.event_type {
            event_type::FORMAT_DESCRIPTION => self.decode_format_description(payload)?,
            event_type::ROTATE => decode_rotate(payload)?,
            event_type::QUERY => decode_query(payload)?,
            event_type::XID => decode_xid(payload)?,
            event_type::TABLE_MAP => {
                let map = decode_table_map(payload)?;
                self.tables.insert(
                    map.table_id,
                    CachedTable {
                        map: map.clone(),
                        projection: None,
                    },
                );
                BinlogEvent::TableMap(map)
            }
            event_type::WRITE_ROWS_V1
            | event_type::WRITE_ROWS_V2
            | event_type::UPDATE_ROWS_V1
            | event_type::UPDATE_ROWS_V2
            | event_type::DELETE_ROWS_V1
            | event_type::DELETE_ROWS_V2
            | event_type::MARIA_WRITE_ROWS_COMPRESSED
            | event_type::MARIA_UPDATE_ROWS_COMPRESSED
            | event_type::MARIA_DELETE_ROWS_COMPRESSED => {
                self.decode_rows(header.event_type, payload)?
            }
            event_type::HEARTBEAT => BinlogEvent::Heartbeat,
            other => BinlogEvent::Ignored(other),
        };

        Ok(DecodedEvent { header, event })
    }

    fn decode_format_description(&self, data: &[u8]) -> Result<BinlogEvent> {
        if data.len() < 2 + 50 {
            bail!("format description event too short");
        }
        let mut cursor = Cursor::new(data);
        let binlog_version = cursor.get_u16_le();
        let mut version_bytes = [0u8; 50];
        cursor.read_exact(&mut version_bytes)?;
        let server_version = String::from_utf8_lossy(&version_bytes)
            .trim_end_matches('\0')
            .to_string();
        Ok(BinlogEvent::FormatDescription {
            binlog_version,
            server_version,
        })
    }

    fn decode_rows(&self, event_type_code: u8, data: &[u8]) -> Result<BinlogEvent> {
        use event_type::*;

        let kind = match event_type_code {
            WRITE_ROWS_V1 | WRITE_ROWS_V2 | MARIA_WRITE_ROWS_COMPRESSED => RowsKind::Write,
            UPDATE_ROWS_V1 | UPDATE_ROWS_V2 | MARIA_UPDATE_ROWS_COMPRESSED => RowsKind::Update,
            _ => RowsKind::Delete,
        };
        let compressed = matches!(
            event_type_code,
            MARIA_WRITE_ROWS_COMPRESSED | MARIA_UPDATE_ROWS_COMPRESSED
                | MARIA_DELETE_ROWS_COMPRESSED
        );

        let mut cursor = Cursor::new(data);
        if cursor.remaining() < 8 {
            bail!("rows event too short");
        }
        let table_id = read_table_id(&mut cursor);
        let _flags = cursor.get_u16_le();

        // The v2 extra-data length includes its own two bytes.
        if matches!(
            event_type_code,
            WRITE_ROWS_V2 | UPDATE_ROWS_V2 | DELETE_ROWS_V2
        ) {
            if cursor.remaining() < 2 {
                bail!("rows event truncated in extra data");
            }
            let extra_len = cursor.get_u16_le() as usize;
            if extra_len > 2 {
                let skip = extra_len - 2;
                if cursor.remaining() < skip {
                    bail!("rows event truncated in extra data");
                }
                cursor.advance(skip);
            }
        }

        let column_count = read_packed_int(&mut cursor)? as usize;
        let bitmap_len = column_count.div_ceil(8);

        let before_bitmap = read_bytes(&mut cursor, bitmap_len)?;
        let after_bitmap = if kind == RowsKind::Update {
            Some(read_bytes(&mut cursor, bitmap_len)?)
        } else {
            None
        };

        let entry = match self.tables.get(&table_id) {
            Some(entry) => entry,
            None => {
                warn!(table_id, "rows event for unmapped table");
                return Ok(BinlogEvent::Rows(RowsEvent {
                    table_id,
                    kind,
                    captured: false,
                    rows: Vec::new(),
                }));
            }
        };

        let projection = match &entry.projection {
            Some(projection) => projection,
            None => {
                return Ok(BinlogEvent::Rows(RowsEvent {
                    table_id,
                    kind,
                    captured: false,
                    rows: Vec::new(),
                }));
            }
        };

        let decompressed;
        let mut row_cursor = if compressed {
            let rest = &data[cursor.position() as usize..];
            decompressed = maria_decompress(rest)?;
            Cursor::new(decompressed.as_slice())
        } else {
            Cursor::new(&data[cursor.position() as usize..])
        };

        let rows = decode_row_images(
            &mut row_cursor,
            &entry.map,
            projection,
            column_count,
            &before_bitmap,
            after_bitmap.as_deref(),
            kind,
        )?;

        Ok(BinlogEvent::Rows(RowsEvent {
            table_id,
            kind,
            captured: true,
            rows,
        }))
    }
}

fn decode_rotate(data: &[u8]) -> Result<BinlogEvent> {
    if data.len() < 8 {
        bail!("rotate event too short");
    }
    let mut cursor = Cursor::new(data);
    let position = cursor.get_u64_le();
    let next_file = String::from_utf8_lossy(&data[8..])
        .trim_end_matches('\0')
        .to_string();
    Ok(BinlogEvent::Rotate {
        position,
        next_file,
    })
}

fn decode_xid(data: &[u8]) -> Result<BinlogEvent> {
    if data.len() < 8 {
        bail!("xid event too short");
    }
    let mut cursor = Cursor::new(data);
    Ok(BinlogEvent::Xid {
        xid: cursor.get_u64_le(),
    })
}

fn decode_query(data: &[u8]) -> Result<BinlogEvent> {
    if data.len() < 13 {
        bail!("query event too short");
    }
    let mut cursor = Cursor::new(data);
    let _thread_id = cursor.get_u32_le();
    let _exec_time = cursor.get_u32_le();
    let schema_len = cursor.get_u8() as usize;
    let _error_code = cursor.get_u16_le();
    let status_len = cursor.get_u16_le() as usize;

    if cursor.remaining() < status_len + schema_len + 1 {
        bail!("query event truncated");
    }
    cursor.advance(status_len);

    let schema_bytes = read_bytes(&mut cursor, schema_len)?;
    let schema = String::from_utf8_lossy(&schema_bytes).to_string();
    cursor.get_u8(); // null terminator

    let rest = &data[cursor.position() as usize..];
    let query = String::from_utf8_lossy(rest)
        .trim_end_matches('\0')
        .to_string();

    Ok(BinlogEvent::Query(QueryEvent { schema, query }))
}

fn decode_table_map(data: &[u8]) -> Result<TableMapEvent> {
    let mut cursor = Cursor::new(data);
    if cursor.remaining() < 8 {
        bail!("table map event too short");
    }

    let table_id = read_table_id(&mut cursor);
    let _flags = cursor.get_u16_le();

    let schema_len = cursor.get_u8() as usize;
    let schema_bytes = read_bytes(&mut cursor, schema_len)?;
    let schema_name = String::from_utf8_lossy(&schema_bytes).to_string();
    cursor.get_u8(); // null terminator

    let table_len = cursor.get_u8() as usize;
    let table_bytes = read_bytes(&mut cursor, table_len)?;
    let table_name = String::from_utf8_lossy(&table_bytes).to_string();
    cursor.get_u8(); // null terminator

    let column_count = read_packed_int(&mut cursor)? as usize;
    let column_types = read_bytes(&mut cursor, column_count)?;
    let mut real_types = column_types.clone();

    let _metadata_len = read_packed_int(&mut cursor)? as usize;
    let mut column_metadata = vec![0u16; column_count];

    for (i, &col_type) in column_types.iter().enumerate() {
        use column_type::*;
        column_metadata[i] = match col_type {
            FLOAT | DOUBLE | TIMESTAMP2 | DATETIME2 | TIME2 | JSON | BLOB | TINY_BLOB
            | MEDIUM_BLOB | LONG_BLOB | GEOMETRY => cursor.get_u8() as u16,
            NEWDECIMAL => {
                let precision = cursor.get_u8() as u16;
                let scale = cursor.get_u8() as u16;
                (precision << 8) | scale
            }
            BIT | VARCHAR | VAR_STRING | ENUM | SET => cursor.get_u16_le(),
            STRING => {
                // Two bytes: real type in the low byte of the LE view,
                // declared length in the high byte.
                let meta = cursor.get_u16_le();
                let real = (meta & 0xFF) as u8;
                if real == ENUM || real == SET {
                    real_types[i] = real;
                }
                meta
            }
            _ => 0,
        };
    }

    debug!(
        table_id,
        schema = %schema_name,
        table = %table_name,
        columns = column_count,
        "table map"
    );

    Ok(TableMapEvent {
        table_id,
        schema_name,
        table_name,
        column_count,
        column_types,
        real_types,
        column_metadata,
    })
}

#[allow(clippy::too_many_arguments)]
fn decode_row_images(
    cursor: &mut Cursor<&[u8]>,
    map: &TableMapEvent,
    projection: &[usize],
    column_count: usize,
    before_bitmap: &[u8],
    after_bitmap: Option<&[u8]>,
    kind: RowsKind,
) -> Result<Vec<RowData>> {
    let mut rows = Vec::new();

    let before_null_len = count_set_bits(before_bitmap).div_ceil(8);
    let after_null_len = after_bitmap
        .map(|b| count_set_bits(b).div_ceil(8))
        .unwrap_or(0);

    while cursor.has_remaining() {
        match kind {
            RowsKind::Write => {
                if cursor.remaining() < before_null_len {
                    break;
                }
                let values =
                    decode_one_image(cursor, map, projection, column_count, before_bitmap)?;
                rows.push(RowData {
                    before: None,
                    after: Some(values),
                });
            }
            RowsKind::Delete => {
                if cursor.remaining() < before_null_len {
                    break;
                }
                let values =
                    decode_one_image(cursor, map, projection, column_count, before_bitmap)?;
                rows.push(RowData {
                    before: Some(values),
                    after: None,
                });
            }
            RowsKind::Update => {
                if cursor.remaining() < before_null_len {
                    break;
                }
                let before =
                    decode_one_image(cursor, map, projection, column_count, before_bitmap)?;
                if cursor.remaining() < after_null_len {
                    bail!("update row truncated before after-image");
                }
                let after_bitmap = after_bitmap.unwrap_or(before_bitmap);
                let after =
                    decode_one_image(cursor, map, projection, column_count, after_bitmap)?;
                rows.push(RowData {
                    before: Some(before),
                    after: Some(after),
                });
            }
        }
    }

    Ok(rows)
}

/// Decode one row image. The null bitmap is sized by the number of columns
/// marked present in `present_bitmap`. Projected columns are materialized,
/// everything else is advanced over.
fn decode_one_image(
    cursor: &mut Cursor<&[u8]>,
    map: &TableMapEvent,
    projection: &[usize],
    column_count: usize,
    present_bitmap: &[u8],
) -> Result<Vec<(usize, ColumnValue)>> {
    let present_count = count_set_bits(present_bitmap);
    let null_bitmap = read_bytes(cursor, present_count.div_ceil(8))?;

    let mut values = Vec::with_capacity(projection.len());
    let mut present_idx = 0usize;

    for col_idx in 0..column_count {
        if !is_bit_set(present_bitmap, col_idx) {
            continue;
        }
        let is_null = is_bit_set(&null_bitmap, present_idx);
        present_idx += 1;

        let projected = projection.binary_search(&col_idx).is_ok();

        if is_null {
            if projected {
                values.push((col_idx, ColumnValue::Null));
            }
            continue;
        }

        let real_type = *map
            .real_types
            .get(col_idx)
            .context("column index out of range")?;
        let meta = map.column_metadata.get(col_idx).copied().unwrap_or(0);

        if projected {
            values.push((col_idx, decode_value(cursor, real_type, meta)?));
        } else {
            skip_value(cursor, real_type, meta)?;
        }
    }

    Ok(values)
}

fn decode_value(cursor: &mut Cursor<&[u8]>, real_type: u8, meta: u16) -> Result<ColumnValue> {
    use column_type::*;

    let value = match real_type {
        TINY => ColumnValue::SignedInt(cursor.get_i8() as i64),
        SHORT => ColumnValue::SignedInt(cursor.get_i16_le() as i64),
        INT24 => {
            let raw = cursor.get_u8() as u32
                | ((cursor.get_u8() as u32) << 8)
                | ((cursor.get_u8() as u32) << 16);
            let signed = if raw & 0x80_0000 != 0 {
                (raw | 0xFF00_0000) as i32
            } else {
                raw as i32
            };
            ColumnValue::SignedInt(signed as i64)
        }
        LONG => ColumnValue::SignedInt(cursor.get_i32_le() as i64),
        LONGLONG => ColumnValue::SignedInt(cursor.get_i64_le()),
        FLOAT => ColumnValue::Float(cursor.get_f32_le()),
        DOUBLE => ColumnValue::Double(cursor.get_f64_le()),
        YEAR => ColumnValue::Year(cursor.get_u8() as u16 + 1900),
        DATE | NEWDATE => {
            let packed = cursor.get_u8() as u32
                | ((cursor.get_u8() as u32) << 8)
                | ((cursor.get_u8() as u32) << 16);
            ColumnValue::Date {
                year: ((packed >> 9) & 0x7FFF) as u16,
                month: ((packed >> 5) & 0x0F) as u8,
                day: (packed & 0x1F) as u8,
            }
        }
        TIME => {
            let packed = cursor.get_u8() as u32
                | ((cursor.get_u8() as u32) << 8)
                | ((cursor.get_u8() as u32) << 16);
            ColumnValue::Time {
                negative: false,
                hours: (packed / 10000) as u16,
                minutes: ((packed / 100) % 100) as u8,
                seconds: (packed % 100) as u8,
                microseconds: 0,
            }
        }
        TIME2 => {
            let packed = ((cursor.get_u8() as u32) << 16)
                | ((cursor.get_u8() as u32) << 8)
                | cursor.get_u8() as u32;
            let microseconds = read_fractional(cursor, meta as u8)?;
            let negative = packed & 0x80_0000 == 0;
            let magnitude = if negative {
                0x80_0000 - (packed & 0x7F_FFFF)
            } else {
                packed & 0x7F_FFFF
            };
            ColumnValue::Time {
                negative,
                hours: ((magnitude >> 12) & 0x3FF) as u16,
                minutes: ((magnitude >> 6) & 0x3F) as u8,
                seconds: (magnitude & 0x3F) as u8,
                microseconds,
            }
        }
        DATETIME => {
            let packed = cursor.get_u64_le();
            ColumnValue::DateTime {
                year: (packed / 10_000_000_000) as u16,
                month: ((packed / 100_000_000) % 100) as u8,
                day: ((packed / 1_000_000) % 100) as u8,
                hour: ((packed / 10_000) % 100) as u8,
                minute: ((packed / 100) % 100) as u8,
                second: (packed % 100) as u8,
                microseconds: 0,
            }
        }
        DATETIME2 => {
            let mut packed: u64 = 0;
            for _ in 0..5 {
                packed = (packed << 8) | cursor.get_u8() as u64;
            }
            let microseconds = read_fractional(cursor, meta as u8)?;
            let packed = packed.wrapping_sub(0x80_0000_0000);
            let ymd = packed >> 17;
            let ym = ymd >> 5;
            let hms = packed & 0x1_FFFF;
            ColumnValue::DateTime {
                year: (ym / 13) as u16,
                month: (ym % 13) as u8,
                day: (ymd & 0x1F) as u8,
                hour: (hms >> 12) as u8,
                minute: ((hms >> 6) & 0x3F) as u8,
                second: (hms & 0x3F) as u8,
                microseconds,
            }
        }
        TIMESTAMP => ColumnValue::Timestamp(cursor.get_u32_le()),
        TIMESTAMP2 => {
            let seconds = cursor.get_u32();
            let microseconds = read_fractional(cursor, meta as u8)?;
            timestamp2_to_datetime(seconds, microseconds)
        }
        VARCHAR | VAR_STRING => {
            let len = if meta < 256 {
                cursor.get_u8() as usize
            } else {
                cursor.get_u16_le() as usize
            };
            let bytes = read_bytes(cursor, len)?;
            ColumnValue::String(String::from_utf8_lossy(&bytes).to_string())
        }
        STRING => {
            // Metadata-high-byte rule for the length prefix.
            let len = if meta >> 8 == 0 {
                cursor.get_u8() as usize
            } else {
                cursor.get_u16_le() as usize
            };
            let bytes = read_bytes(cursor, len)?;
            ColumnValue::String(String::from_utf8_lossy(&bytes).to_string())
        }
        ENUM => {
            let ordinal = if (meta >> 8) & 0xFF == 1 {
                cursor.get_u8() as u16
            } else {
                cursor.get_u16_le()
            };
            ColumnValue::Enum(ordinal)
        }
        SET => {
            let byte_count = ((meta >> 8) & 0xFF).max(1) as usize;
            let mut bits: u64 = 0;
            for i in 0..byte_count.min(8) {
                bits |= (cursor.get_u8() as u64) << (i * 8);
            }
            ColumnValue::Set(bits)
        }
        BIT => {
            let nbits = ((meta >> 8) * 8 + (meta & 0xFF)) as usize;
            let len = nbits.div_ceil(8).max(1);
            let bytes = read_bytes(cursor, len)?;
            let mut bits: u64 = 0;
            for b in bytes.iter().take(8) {
                bits = (bits << 8) | *b as u64;
            }
            ColumnValue::Bit(bits)
        }
        NEWDECIMAL => {
            let precision = (meta >> 8) as usize;
            let scale = (meta & 0xFF) as usize;
            ColumnValue::Decimal(decode_decimal(cursor, precision, scale)?)
        }
        JSON => {
            let len = read_length_by_width(cursor, blob_width(real_type, meta))?;
            ColumnValue::Json(read_bytes(cursor, len)?)
        }
        BLOB | TINY_BLOB | MEDIUM_BLOB | LONG_BLOB | GEOMETRY | DECIMAL => {
            let len = read_length_by_width(cursor, blob_width(real_type, meta))?;
            ColumnValue::Bytes(read_bytes(cursor, len)?)
        }
        NULL => ColumnValue::Null,
        other => bail!("unsupported column type {other}"),
    };

    Ok(value)
}

/// Advance the cursor past one non-null value without materializing it.
fn skip_value(cursor: &mut Cursor<&[u8]>, real_type: u8, meta: u16) -> Result<()> {
    use column_type::*;

    let advance = |cursor: &mut Cursor<&[u8]>, n: usize| -> Result<()> {
        if cursor.remaining() < n {
            bail!("row truncated while skipping a column");
        }
        cursor.advance(n);
        Ok(())
    };

    match real_type {
        TINY => advance(cursor, 1),
        SHORT => advance(cursor, 2),
        INT24 | TIME | DATE | NEWDATE => advance(cursor, 3),
        LONG | FLOAT | TIMESTAMP => advance(cursor, 4),
        LONGLONG | DOUBLE | DATETIME => advance(cursor, 8),
        YEAR => advance(cursor, 1),
        TIMESTAMP2 => advance(cursor, 4 + fractional_width(meta as u8)),
        DATETIME2 => advance(cursor, 5 + fractional_width(meta as u8)),
        TIME2 => advance(cursor, 3 + fractional_width(meta as u8)),
        VARCHAR | VAR_STRING => {
            let len = if meta < 256 {
                cursor.get_u8() as usize
            } else {
                cursor.get_u16_le() as usize
            };
            advance(cursor, len)
        }
        STRING => {
            let len = if meta >> 8 == 0 {
                cursor.get_u8() as usize
            } else {
                cursor.get_u16_le() as usize
            };
            advance(cursor, len)
        }
        ENUM => {
            let width = if (meta >> 8) & 0xFF == 1 { 1 } else { 2 };
            advance(cursor, width)
        }
        SET => advance(cursor, (((meta >> 8) & 0xFF).max(1) as usize).min(8)),
        BIT => {
            let nbits = ((meta >> 8) * 8 + (meta & 0xFF)) as usize;
            advance(cursor, nbits.div_ceil(8).max(1))
        }
        NEWDECIMAL => {
            let precision = (meta >> 8) as usize;
            let scale = (meta & 0xFF) as usize;
            advance(cursor, decimal_binary_size(precision, scale))
        }
        JSON | BLOB | TINY_BLOB | MEDIUM_BLOB | LONG_BLOB | GEOMETRY | DECIMAL => {
            let len = read_length_by_width(cursor, blob_width(real_type, meta))?;
            advance(cursor, len)
        }
        NULL => Ok(()),
        other => bail!("unsupported column type {other}"),
    }
}

/// Length-prefix width of a blob-family column.
fn blob_width(real_type: u8, meta: u16) -> usize {
    use column_type::*;
    match meta {
        1..=4 => meta as usize,
        _ => match real_type {
            TINY_BLOB => 1,
            MEDIUM_BLOB => 3,
            LONG_BLOB => 4,
            _ => 2,
        },
    }
}

fn read_length_by_width(cursor: &mut Cursor<&[u8]>, width: usize) -> Result<usize> {
    if cursor.remaining() < width {
        bail!("row truncated in a length prefix");
    }
    let mut len: usize = 0;
    for i in 0..width {
        len |= (cursor.get_u8() as usize) << (8 * i);
    }
    Ok(len)
}

fn fractional_width(fsp: u8) -> usize {
    (fsp as usize).div_ceil(2)
}

/// Read the stored fraction and widen it to microseconds.
fn read_fractional(cursor: &mut Cursor<&[u8]>, fsp: u8) -> Result<u32> {
    if fsp == 0 {
        return Ok(0);
    }
    let width = fractional_width(fsp);
    if cursor.remaining() < width {
        bail!("row truncated in fractional seconds");
    }
    let mut raw: u32 = 0;
    for _ in 0..width {
        raw = (raw << 8) | cursor.get_u8() as u32;
    }
    Ok(raw * 10u32.pow(6 - fsp.min(6) as u32))
}

fn timestamp2_to_datetime(seconds: u32, microseconds: u32) -> ColumnValue {
    use chrono::{Datelike, Timelike};
    match chrono::DateTime::from_timestamp(seconds as i64, 0) {
        Some(dt) => ColumnValue::DateTime {
            year: dt.year() as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            microseconds,
        },
        None => ColumnValue::Timestamp(seconds),
    }
}

/// Size of a packed decimal with the given precision and scale.
fn decimal_binary_size(precision: usize, scale: usize) -> usize {
    const DIGITS_PER_WORD: usize = 9;
    let leftover_bytes = |digits: usize| -> usize {
        match digits {
            0 => 0,
            1..=2 => 1,
            3..=4 => 2,
            5..=6 => 3,
            _ => 4,
        }
    };
    let int_digits = precision.saturating_sub(scale);
    (int_digits / DIGITS_PER_WORD) * 4
        + leftover_bytes(int_digits % DIGITS_PER_WORD)
        + (scale / DIGITS_PER_WORD) * 4
        + leftover_bytes(scale % DIGITS_PER_WORD)
}

/// Decode a MySQL packed DECIMAL into its text form.
fn decode_decimal(cursor: &mut Cursor<&[u8]>, precision: usize, scale: usize) -> Result<String> {
    let int_digits = precision.saturating_sub(scale);
    let int_words = int_digits / 9;
    let int_leftover = int_digits % 9;
    let frac_words = scale / 9;
    let frac_leftover = scale % 9;

    let total = decimal_binary_size(precision, scale);
    let mut bytes = read_bytes(cursor, total)?;
    if bytes.is_empty() {
        return Ok("0".to_string());
    }

    // The sign bit is stored inverted; negatives store the complement.
    let negative = bytes[0] & 0x80 == 0;
    bytes[0] ^= 0x80;
    if negative {
        for b in bytes.iter_mut() {
            *b = !*b;
        }
    }

    let mut words = Cursor::new(bytes.as_slice());
    let read_be = |cursor: &mut Cursor<&[u8]>, n: usize| -> u32 {
        let mut val: u32 = 0;
        for _ in 0..n {
            val = (val << 8) | cursor.get_u8() as u32;
        }
        val
    };
    let leftover_bytes = |digits: usize| -> usize {
        match digits {
            0 => 0,
            1..=2 => 1,
            3..=4 => 2,
            5..=6 => 3,
            _ => 4,
        }
    };

    let mut int_part = String::new();
    if int_leftover > 0 {
        let val = read_be(&mut words, leftover_bytes(int_leftover));
        if val > 0 || int_words == 0 {
            int_part.push_str(&val.to_string());
        }
    }
    for _ in 0..int_words {
        let val = words.get_u32();
        if int_part.is_empty() {
            if val != 0 {
                int_part.push_str(&val.to_string());
            }
        } else {
            int_part.push_str(&format!("{val:09}"));
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&int_part);

    if scale > 0 {
        out.push('.');
        for _ in 0..frac_words {
            let val = words.get_u32();
            out.push_str(&format!("{val:09}"));
        }
        if frac_leftover > 0 {
            let val = read_be(&mut words, leftover_bytes(frac_leftover));
            out.push_str(&format!("{val:0width$}", width = frac_leftover));
        }
    }

    Ok(out)
}

/// Inflate a MariaDB compressed rows payload.
///
/// Layout: one header byte (`size = b & 0x07`, `algorithm = (b >> 4) & 0x07`,
/// only algorithm 0 = zlib is defined), `size` little-endian bytes of
/// uncompressed length, then the zlib stream.
fn maria_decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 2 {
        bail!("compressed rows payload too short");
    }
    let header = data[0];
    let header_size = (header & 0x07) as usize;
    let algorithm = (header >> 4) & 0x07;
    if header_size == 0 || 1 + header_size > data.len() {
        bail!("invalid compressed rows header");
    }
    if algorithm != 0 {
        bail!("unsupported compression algorithm {algorithm}");
    }

    let mut expected: usize = 0;
    for i in 0..header_size {
        expected |= (data[1 + i] as usize) << (8 * i);
    }

    let mut out = Vec::with_capacity(expected);
    let mut decoder = flate2::read::ZlibDecoder::new(&data[1 + header_size..]);
    decoder
        .read_to_end(&mut out)
        .context("zlib inflate failed")?;
    Ok(out)
}

fn read_table_id(cursor: &mut Cursor<&[u8]>) -> u64 {
    let mut id: u64 = 0;
    for i in 0..6 {
        id |= (cursor.get_u8() as u64) << (8 * i);
    }
    id
}

fn read_packed_int(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    if !cursor.has_remaining() {
        bail!("truncated length-encoded integer");
    }
    let first = cursor.get_u8();
    match first {
        0..=250 => Ok(first as u64),
        252 => Ok(cursor.get_u16_le() as u64),
        253 => {
            let b1 = cursor.get_u8() as u64;
            let b2 = cursor.get_u8() as u64;
            let b3 = cursor.get_u8() as u64;
            Ok(b1 | (b2 << 8) | (b3 << 16))
        }
        254 => Ok(cursor.get_u64_le()),
        other => bail!("invalid length-encoded integer: {other}"),
    }
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, n: usize) -> Result<Vec<u8>> {
    if cursor.remaining() < n {
        bail!("unexpected end of event ({} < {n} bytes)", cursor.remaining());
    }
    let mut buf = vec![0u8; n];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn count_set_bits(bitmap: &[u8]) -> usize {
    bitmap.iter().map(|b| b.count_ones() as usize).sum()
}

fn is_bit_set(bitmap: &[u8], idx: usize) -> bool {
    let byte = idx / 8;
    byte < bitmap.len() && (bitmap[byte] >> (idx % 8)) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn header_bytes(event_type_code: u8, payload_len: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(EventHeader::SIZE + payload_len);
        data.put_u32_le(1_700_000_000); // timestamp
        data.put_u8(event_type_code);
        data.put_u32_le(1); // server id
        data.put_u32_le((EventHeader::SIZE + payload_len) as u32);
        data.put_u32_le(4096); // next position
        data.put_u16_le(0); // flags
        data
    }

    /// TABLE_MAP for `testdb.users (id INT, name VARCHAR(40), balance INT)`.
    fn users_table_map(table_id: u64) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&table_id.to_le_bytes()[..6]);
        payload.put_u16_le(1); // flags
        payload.put_u8(6);
        payload.extend_from_slice(b"testdb\0");
        payload.put_u8(5);
        payload.extend_from_slice(b"users\0");
        payload.put_u8(3); // column count
        payload.put_u8(column_type::LONG);
        payload.put_u8(column_type::VARCHAR);
        payload.put_u8(column_type::LONG);
        payload.put_u8(2); // metadata length
        payload.put_u16_le(160); // varchar max length

        let mut data = header_bytes(event_type::TABLE_MAP, payload.len());
        data.extend_from_slice(&payload);
        data
    }

    /// A write-rows body for the `users` map: one row `(7, "ann", 25)`.
    fn users_write_rows_body(v2: bool) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u64.to_le_bytes()[..6]);
        payload.put_u16_le(0); // flags
        if v2 {
            payload.put_u16_le(2); // extra data length, includes itself
        }
        payload.put_u8(3); // column count
        payload.put_u8(0b0000_0111); // present bitmap
        payload.put_u8(0b0000_0000); // null bitmap (sized by present count)
        payload.put_i32_le(7);
        payload.put_u8(3);
        payload.extend_from_slice(b"ann");
        payload.put_i32_le(25);
        payload
    }

    fn decoder_with_users(projection: Option<Vec<usize>>) -> BinlogDecoder {
        let mut decoder = BinlogDecoder::new(false);
        let map = Bytes::from(users_table_map(1));
        decoder.decode(&map).unwrap();
        decoder.set_projection(1, projection);
        decoder
    }

    #[test]
    fn test_header_parse() {
        let data = header_bytes(event_type::XID, 8);
        let header = EventHeader::parse(&data).unwrap();
        assert_eq!(header.event_type, event_type::XID);
        assert_eq!(header.next_position, 4096);
        assert!(EventHeader::parse(&data[..10]).is_err());
    }

    #[test]
    fn test_table_map_decode() {
        let mut decoder = BinlogDecoder::new(false);
        let data = Bytes::from(users_table_map(9));
        let decoded = decoder.decode(&data).unwrap();
        let map = match decoded.event {
            BinlogEvent::TableMap(map) => map,
            other => panic!("expected table map, got {other:?}"),
        };
        assert_eq!(map.table_id, 9);
        assert_eq!(map.schema_name, "testdb");
        assert_eq!(map.table_name, "users");
        assert_eq!(map.column_count, 3);
        assert_eq!(map.column_metadata[1], 160);
        assert!(decoder.table_map(9).is_some());
    }

    #[test]
    fn test_string_metadata_enum_fixup() {
        // MT_STRING whose metadata low byte announces ENUM.
        let mut payload = Vec::new();
        payload.extend_from_slice(&4u64.to_le_bytes()[..6]);
        payload.put_u16_le(0);
        payload.put_u8(2);
        payload.extend_from_slice(b"db\0");
        payload.put_u8(1);
        payload.extend_from_slice(b"t\0");
        payload.put_u8(1);
        payload.put_u8(column_type::STRING);
        payload.put_u8(2);
        payload.put_u16_le(((1u16) << 8) | column_type::ENUM as u16);

        let mut data = header_bytes(event_type::TABLE_MAP, payload.len());
        data.extend_from_slice(&payload);

        let mut decoder = BinlogDecoder::new(false);
        let decoded = decoder.decode(&Bytes::from(data)).unwrap();
        match decoded.event {
            BinlogEvent::TableMap(map) => {
                assert_eq!(map.column_types[0], column_type::STRING);
                assert_eq!(map.real_types[0], column_type::ENUM);
            }
            other => panic!("expected table map, got {other:?}"),
        }
    }

    #[test]
    fn test_write_rows_v2_extra_len_includes_itself() {
        let mut decoder = decoder_with_users(Some(vec![0, 1, 2]));

        let body = users_write_rows_body(true);
        let mut data = header_bytes(event_type::WRITE_ROWS_V2, body.len());
        data.extend_from_slice(&body);

        let decoded = decoder.decode(&Bytes::from(data)).unwrap();
        let rows = match decoded.event {
            BinlogEvent::Rows(rows) => rows,
            other => panic!("expected rows, got {other:?}"),
        };
        assert!(rows.captured);
        assert_eq!(rows.kind, RowsKind::Write);
        assert_eq!(rows.rows.len(), 1);

        let after = rows.rows[0].after.as_ref().unwrap();
        assert_eq!(after[0], (0, ColumnValue::SignedInt(7)));
        assert_eq!(after[1], (1, ColumnValue::String("ann".into())));
        assert_eq!(after[2], (2, ColumnValue::SignedInt(25)));
    }

    #[test]
    fn test_projection_skips_unlisted_columns() {
        // Only `balance` (index 2) projected; `id` and `name` are skipped.
        let mut decoder = decoder_with_users(Some(vec![2]));

        let body = users_write_rows_body(false);
        let mut data = header_bytes(event_type::WRITE_ROWS_V1, body.len());
        data.extend_from_slice(&body);

        let decoded = decoder.decode(&Bytes::from(data)).unwrap();
        match decoded.event {
            BinlogEvent::Rows(rows) => {
                let after = rows.rows[0].after.as_ref().unwrap();
                assert_eq!(after, &vec![(2, ColumnValue::SignedInt(25))]);
            }
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn test_uncaptured_table_rows_left_unparsed() {
        let mut decoder = decoder_with_users(None);

        let body = users_write_rows_body(false);
        let mut data = header_bytes(event_type::WRITE_ROWS_V1, body.len());
        data.extend_from_slice(&body);

        let decoded = decoder.decode(&Bytes::from(data)).unwrap();
        match decoded.event {
            BinlogEvent::Rows(rows) => {
                assert!(!rows.captured);
                assert!(rows.rows.is_empty());
            }
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn test_update_null_bitmap_sized_by_present_count() {
        let mut decoder = decoder_with_users(Some(vec![0, 1, 2]));

        // Before image carries only columns 0 and 2; after image all three.
        let mut body = Vec::new();
        body.extend_from_slice(&1u64.to_le_bytes()[..6]);
        body.put_u16_le(0);
        body.put_u8(3);
        body.put_u8(0b0000_0101); // before present: id, balance
        body.put_u8(0b0000_0111); // after present: all
        // Before: 2 present columns -> 1 null-bitmap byte, balance NULL.
        body.put_u8(0b0000_0010);
        body.put_i32_le(7);
        // After image: no nulls.
        body.put_u8(0b0000_0000);
        body.put_i32_le(7);
        body.put_u8(1);
        body.extend_from_slice(b"x");
        body.put_i32_le(100);

        let mut data = header_bytes(event_type::UPDATE_ROWS_V1, body.len());
        data.extend_from_slice(&body);

        let decoded = decoder.decode(&Bytes::from(data)).unwrap();
        let rows = match decoded.event {
            BinlogEvent::Rows(rows) => rows,
            other => panic!("expected rows, got {other:?}"),
        };
        let row = &rows.rows[0];
        assert_eq!(
            row.before.as_ref().unwrap(),
            &vec![(0, ColumnValue::SignedInt(7)), (2, ColumnValue::Null)]
        );
        assert_eq!(
            row.after.as_ref().unwrap(),
            &vec![
                (0, ColumnValue::SignedInt(7)),
                (1, ColumnValue::String("x".into())),
                (2, ColumnValue::SignedInt(100)),
            ]
        );
    }

    #[test]
    fn test_mariadb_compressed_write_rows() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut decoder = decoder_with_users(Some(vec![0, 1, 2]));

        // Same row as the uncompressed case, but the bytes after the
        // bitmaps go through zlib with the MariaDB framing.
        let mut row_bytes = Vec::new();
        row_bytes.put_u8(0b0000_0000); // null bitmap
        row_bytes.put_i32_le(7);
        row_bytes.put_u8(3);
        row_bytes.extend_from_slice(b"ann");
        row_bytes.put_i32_le(25);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&row_bytes).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut body = Vec::new();
        body.extend_from_slice(&1u64.to_le_bytes()[..6]);
        body.put_u16_le(0);
        body.put_u8(3); // column count
        body.put_u8(0b0000_0111); // present bitmap
        body.put_u8(0x01); // header: algorithm 0, 1 length byte
        body.put_u8(row_bytes.len() as u8);
        body.extend_from_slice(&compressed);

        let mut data = header_bytes(event_type::MARIA_WRITE_ROWS_COMPRESSED, body.len());
        data.extend_from_slice(&body);

        let decoded = decoder.decode(&Bytes::from(data)).unwrap();
        match decoded.event {
            BinlogEvent::Rows(rows) => {
                let after = rows.rows[0].after.as_ref().unwrap();
                assert_eq!(after[0], (0, ColumnValue::SignedInt(7)));
                assert_eq!(after[1], (1, ColumnValue::String("ann".into())));
                assert_eq!(after[2], (2, ColumnValue::SignedInt(25)));
            }
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn test_maria_decompress_rejects_other_algorithms() {
        // Algorithm 1 in the header nibble.
        let data = [0x11, 4, 0, 0, 0, 0];
        assert!(maria_decompress(&data).is_err());
    }

    #[test]
    fn test_checksum_stripping() {
        let mut decoder = BinlogDecoder::new(true);

        let mut payload = 77u64.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]); // checksum
        let mut data = header_bytes(event_type::XID, payload.len());
        data.extend_from_slice(&payload);

        match decoder.decode(&Bytes::from(data)).unwrap().event {
            BinlogEvent::Xid { xid } => assert_eq!(xid, 77),
            other => panic!("expected xid, got {other:?}"),
        }
    }

    #[test]
    fn test_query_event_decode() {
        let mut payload = Vec::new();
        payload.put_u32_le(11); // thread id
        payload.put_u32_le(0); // exec time
        payload.put_u8(6); // schema length
        payload.put_u16_le(0); // error code
        payload.put_u16_le(0); // status vars length
        payload.extend_from_slice(b"testdb\0");
        payload.extend_from_slice(b"BEGIN");

        let mut data = header_bytes(event_type::QUERY, payload.len());
        data.extend_from_slice(&payload);

        let mut decoder = BinlogDecoder::new(false);
        match decoder.decode(&Bytes::from(data)).unwrap().event {
            BinlogEvent::Query(q) => {
                assert_eq!(q.schema, "testdb");
                assert_eq!(q.query, "BEGIN");
            }
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn test_rotate_decode() {
        let mut payload = 4u64.to_le_bytes().to_vec();
        payload.extend_from_slice(b"mysql-bin.000008");

        let mut data = header_bytes(event_type::ROTATE, payload.len());
        data.extend_from_slice(&payload);

        let mut decoder = BinlogDecoder::new(false);
        match decoder.decode(&Bytes::from(data)).unwrap().event {
            BinlogEvent::Rotate {
                position,
                next_file,
            } => {
                assert_eq!(position, 4);
                assert_eq!(next_file, "mysql-bin.000008");
            }
            other => panic!("expected rotate, got {other:?}"),
        }
    }

    #[test]
    fn test_decimal_decode() {
        // DECIMAL(10,2) for 1234567.89: int part 12345678 across one word +
        // leftover, fraction 89. Encode per the storage rules.
        let precision = 10usize;
        let scale = 2usize;
        assert_eq!(decimal_binary_size(precision, scale), 5);

        // Integer digits: 8 -> leftover 8 digits = 4 bytes; fraction 2 -> 1 byte.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1234567u32.to_be_bytes());
        bytes.push(89u8);
        bytes[0] |= 0x80; // positive sign bit

        let mut cursor = Cursor::new(bytes.as_slice());
        let text = decode_decimal(&mut cursor, precision, scale).unwrap();
        assert_eq!(text, "1234567.89");
    }

    #[test]
    fn test_negative_decimal_decode() {
        let precision = 4usize;
        let scale = 1usize;
        // -12.5: magnitude int 12 (1 byte? 3 digits -> 2 bytes), frac 5.
        assert_eq!(decimal_binary_size(precision, scale), 3);
        let mut bytes = vec![0u8; 3];
        bytes[0..2].copy_from_slice(&12u16.to_be_bytes());
        bytes[2] = 5;
        bytes[0] |= 0x80;
        // Complement for negative storage.
        for b in bytes.iter_mut() {
            *b = !*b;
        }

        let mut cursor = Cursor::new(bytes.as_slice());
        let text = decode_decimal(&mut cursor, precision, scale).unwrap();
        assert_eq!(text, "-12.5");
    }

    #[test]
    fn test_datetime2_decode() {
        // 2024-01-15 12:30:45, fsp 0.
        let year = 2024u64;
        let month = 1u64;
        let day = 15u64;
        let ym = year * 13 + month;
        let ymd = (ym << 5) | day;
        let hms = (12u64 << 12) | (30 << 6) | 45;
        let packed = ((ymd << 17) | hms) + 0x80_0000_0000;

        let be = packed.to_be_bytes();
        let data = &be[3..8]; // low 5 bytes
        let mut cursor = Cursor::new(data);
        let value = decode_value(&mut cursor, column_type::DATETIME2, 0).unwrap();
        assert_eq!(
            value,
            ColumnValue::DateTime {
                year: 2024,
                month: 1,
                day: 15,
                hour: 12,
                minute: 30,
                second: 45,
                microseconds: 0,
            }
        );
    }

    #[test]
    fn test_fractional_seconds_widened_to_micros() {
        // fsp=3 stores milliseconds in 2 bytes.
        let data = [0x01, 0xEA]; // 490
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(read_fractional(&mut cursor, 3).unwrap(), 490_000);
    }

    #[test]
    fn test_bit_helpers() {
        assert_eq!(count_set_bits(&[0b1010_1010]), 4);
        assert_eq!(count_set_bits(&[]), 0);
        assert!(is_bit_set(&[0b0000_0100], 2));
        assert!(!is_bit_set(&[0b0000_0100], 3));
        assert!(!is_bit_set(&[0b0000_0100], 64));
    }

    #[test]
    fn test_packed_int_forms() {
        let data = [200u8];
        assert_eq!(read_packed_int(&mut Cursor::new(&data[..])).unwrap(), 200);

        let data = [252u8, 0x39, 0x30];
        assert_eq!(read_packed_int(&mut Cursor::new(&data[..])).unwrap(), 12345);

        let data = [253u8, 0x01, 0x02, 0x03];
        assert_eq!(
            read_packed_int(&mut Cursor::new(&data[..])).unwrap(),
            0x030201
        );
    }
}
