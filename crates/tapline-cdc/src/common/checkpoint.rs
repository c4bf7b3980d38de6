//! Source positions and the checkpoint file
//!
//! A checkpoint is the persisted resume position of one source connection:
//!
//! - MySQL/MariaDB — binlog file name plus byte offset, stored as two text
//!   lines (`file\noffset\n`)
//! - PostgreSQL — a 64-bit LSN, stored as one `HI/LO` hex line
//!
//! The file is rewritten through a temp-file rename. fsync is deliberately
//! not used: the contract is at-least-once from the last persisted position,
//! never ahead of the source's confirmed position.
//!
//! Only the decode loop writes; [`CheckpointFile`] keeps its cadence counter
//! behind a mutex so any thread may trigger a [`flush`](CheckpointFile::flush).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::common::error::{CdcError, Result};
use crate::common::event::RecordKind;

/// PostgreSQL log sequence number, printed as `HI/LO` hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| CdcError::checkpoint(format!("invalid LSN: {s}")))?;
        let hi = u64::from_str_radix(hi, 16)
            .map_err(|_| CdcError::checkpoint(format!("invalid LSN: {s}")))?;
        let lo = u64::from_str_radix(lo, 16)
            .map_err(|_| CdcError::checkpoint(format!("invalid LSN: {s}")))?;
        Ok(Lsn((hi << 32) | lo))
    }
}

/// An opaque, monotonically non-decreasing position in a source's stream.
///
/// Positions from different sources are never compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePosition {
    MySql { file: String, offset: u64 },
    Postgres { lsn: Lsn },
}

impl SourcePosition {
    /// Numeric component of the position, used for the queue item metadata.
    pub fn offset(&self) -> u64 {
        match self {
            SourcePosition::MySql { offset, .. } => *offset,
            SourcePosition::Postgres { lsn } => lsn.0,
        }
    }

    /// Binlog file name, empty for Postgres.
    pub fn file(&self) -> &str {
        match self {
            SourcePosition::MySql { file, .. } => file,
            SourcePosition::Postgres { .. } => "",
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePosition::MySql { file, offset } => write!(f, "{file}:{offset}"),
            SourcePosition::Postgres { lsn } => write!(f, "{lsn}"),
        }
    }
}

/// When the checkpoint file is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPolicy {
    /// After every decoded event.
    EveryEvent,
    /// After every `n` decoded events.
    EveryN(u64),
    /// Only when a transaction commits.
    AtCommit,
}

struct Inner {
    events_since_save: u64,
}

/// Single-writer, many-reader checkpoint store backed by one text file.
pub struct CheckpointFile {
    path: PathBuf,
    policy: CheckpointPolicy,
    enabled: bool,
    inner: Mutex<Inner>,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>, policy: CheckpointPolicy, enabled: bool) -> Self {
        Self {
            path: path.into(),
            policy,
            enabled,
            inner: Mutex::new(Inner {
                events_since_save: 0,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted position, if any.
    ///
    /// Returns `Ok(None)` when position saving is disabled, the file does
    /// not exist, or its contents do not parse (a fresh start is always the
    /// safe interpretation).
    pub fn load(&self) -> Result<Option<SourcePosition>> {
        if !self.enabled {
            return Ok(None);
        }
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut lines = text.lines();
        let first = match lines.next() {
            Some(line) if !line.is_empty() => line,
            _ => return Ok(None),
        };

        if let Some(second) = lines.next() {
            // Two lines: binlog file name and offset.
            match second.trim().parse::<u64>() {
                Ok(offset) => Ok(Some(SourcePosition::MySql {
                    file: first.trim().to_string(),
                    offset,
                })),
                Err(_) => {
                    warn!(path = %self.path.display(), "unparseable checkpoint, starting fresh");
                    Ok(None)
                }
            }
        } else {
            // One line: an LSN.
            match first.trim().parse::<Lsn>() {
                Ok(lsn) => Ok(Some(SourcePosition::Postgres { lsn })),
                Err(_) => {
                    warn!(path = %self.path.display(), "unparseable checkpoint, starting fresh");
                    Ok(None)
                }
            }
        }
    }

    /// Called by the decode loop after every event. Persists the position
    /// when the policy says so. Write failures are logged, never fatal.
    pub fn record(&self, position: &SourcePosition, kind: RecordKind) {
        if !self.enabled {
            return;
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.events_since_save += 1;

        let due = match self.policy {
            CheckpointPolicy::EveryEvent => true,
            CheckpointPolicy::EveryN(n) => inner.events_since_save >= n,
            CheckpointPolicy::AtCommit => kind == RecordKind::Commit,
        };

        if due {
            if let Err(e) = self.write(position) {
                warn!(error = %e, path = %self.path.display(), "checkpoint write failed");
            } else {
                inner.events_since_save = 0;
            }
        }
    }

    /// Forced write, used on rotation and graceful shutdown.
    pub fn flush(&self, position: &SourcePosition) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.write(position) {
            warn!(error = %e, path = %self.path.display(), "checkpoint write failed");
        } else {
            inner.events_since_save = 0;
        }
    }

    fn write(&self, position: &SourcePosition) -> Result<()> {
        let contents = match position {
            SourcePosition::MySql { file, offset } => format!("{file}\n{offset}\n"),
            SourcePosition::Postgres { lsn } => format!("{lsn}\n"),
        };

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(position = %position, "checkpoint saved");
        Ok(())
    }
}
