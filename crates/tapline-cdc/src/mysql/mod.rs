//! MySQL/MariaDB binlog replication source
//!
//! - [`protocol`] — wire client: handshake, authentication, COM_REGISTER_SLAVE,
//!   COM_BINLOG_DUMP and the framed event stream
//! - [`decoder`] — binlog event decoding, including the MariaDB
//!   zlib-compressed row events
//! - [`schema`] — column-name and enum-label side channel over a second
//!   connection
//! - [`source`] — the decode loop tying it all together

pub mod decoder;
pub mod protocol;
pub mod schema;
pub mod source;

pub use source::{MySqlSource, MySqlSourceConfig};
