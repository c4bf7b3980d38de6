//! PostgreSQL replication protocol plumbing.

pub mod client;
pub mod decoder;

pub use client::{ReplicationClient, ReplicationStream};
pub use decoder::{
    BeginBody, Column, CommitBody, DecodeError, DeleteBody, InsertBody, PgOutputDecoder,
    RelationBody, ReplicationMessage, TruncateBody, Tuple, TupleData, UpdateBody,
};
