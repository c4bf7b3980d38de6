//! Error types for CDC operations
//!
//! One enum covers both source dialects. The daemon uses [`CdcError::is_fatal`]
//! to decide whether a failure tears the process down (configuration and
//! connection problems, a desynchronized stream) or is counted and survived
//! (schema lookups, checkpoint writes).

use thiserror::Error;

/// CDC-specific errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// Configuration error, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection or handshake failure against a source
    #[error("Connect error: {0}")]
    Connect(String),

    /// Replication protocol error; the stream is considered desynchronized
    #[error("Replication error: {0}")]
    Replication(String),

    /// Schema side-channel failure (column names, enum labels)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Checkpoint read or write failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout during an operation
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The source closed the replication connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid internal state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl CdcError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new connect error
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    /// Create a new replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a new checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Whether this error should terminate the process.
    ///
    /// Only configuration, connect and protocol errors are process-fatal;
    /// everything else is logged and counted by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Connect(_) | Self::Replication(_) | Self::ConnectionClosed
        )
    }
}

/// Result type for CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;
