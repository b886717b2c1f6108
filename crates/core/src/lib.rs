//! Core types and shared functionality for tagcache.
//!
//! This crate provides:
//! - Tag ledger with invalidation and deletion counters
//! - Cache bin backends (SQLite, in-memory, null) honoring tag state
//! - Cache collector with locked optimistic write-back
//! - Advisory locks, configuration, and unified error types

pub mod backend;
pub mod cache;
pub mod collector;
pub mod config;
pub mod error;
pub mod factory;
pub mod lock;
pub mod tags;

pub use backend::{CacheBackend, CacheEntry, CacheItem, Expiry};
pub use cache::CacheDb;
pub use collector::{CacheCollector, CacheMissResolver, CommitOutcome};
pub use config::AppConfig;
pub use error::Error;
pub use factory::CacheFactory;
pub use lock::LockBackend;
pub use tags::{Checksum, TagLedger, TagStatus};
