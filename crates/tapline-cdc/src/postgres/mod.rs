//! PostgreSQL logical replication source
//!
//! - [`protocol`] — replication wire client (startup, auth, CopyBoth,
//!   standby feedback) and the pgoutput message decoder
//! - [`source`] — the decode loop with the resume clamp against the slot's
//!   `confirmed_flush_lsn`

pub mod protocol;
pub mod source;

pub use source::{PostgresSource, PostgresSourceConfig};
