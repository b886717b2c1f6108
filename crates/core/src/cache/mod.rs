//! SQLite store shared by the database-backed components.
//!
//! This module provides the connection handle and schema management used by
//! the database cache backend, the tag ledger and the lock service:
//!
//! - Async access via tokio-rusqlite
//! - Automatic schema migrations
//! - WAL mode for concurrent access from several processes
//! - Cid normalization for over-long keys

pub mod connection;
pub mod hash;
pub mod migrations;

pub use crate::Error;

pub use connection::CacheDb;
pub use hash::normalize_cid;
