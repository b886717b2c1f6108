//! Cache-related MCP tools.
//!
//! This module provides tools for reading, writing, and invalidating cache bins.

pub mod checksum;
pub mod delete;
pub mod get;
pub mod purge;
pub mod set;
pub mod tags;

pub use checksum::{CacheChecksumParams, checksum_impl};
pub use delete::{CacheDeleteParams, delete_impl};
pub use get::{CacheGetParams, get_impl};
pub use purge::{CachePurgeParams, purge_impl};
pub use set::{CacheSetParams, set_impl};
pub use tags::{CacheTagsParams, delete_tags_impl, invalidate_tags_impl};
