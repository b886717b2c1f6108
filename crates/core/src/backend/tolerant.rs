//! Backend wrapper that degrades store failures into an empty cache.
//!
//! Used while the store may not be ready yet (first boot, schema being
//! installed) or when a request must not fail because caching is down.
//! A structurally broken schema and caller mistakes are still surfaced.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{CacheBackend, CacheEntry, CacheItem};
use crate::Error;

/// Wraps a backend and swallows store errors.
///
/// Reads turn into misses, writes into no-ops, and `is_empty` reports true.
/// [`Error::SchemaBroken`] and invalid-argument errors pass through.
#[derive(Clone)]
pub struct TolerantBackend {
    inner: Arc<dyn CacheBackend>,
}

impl TolerantBackend {
    pub fn new(inner: Arc<dyn CacheBackend>) -> Self {
        Self { inner }
    }

    fn tolerate<T>(&self, op: &'static str, result: Result<T, Error>, fallback: T) -> Result<T, Error> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if e.is_schema_broken() || e.is_programmer_error() => Err(e),
            Err(e) => {
                tracing::warn!(op, error = %e, "cache store unavailable, degrading");
                Ok(fallback)
            }
        }
    }
}

#[async_trait]
impl CacheBackend for TolerantBackend {
    async fn get_multiple(
        &self, cids: &mut Vec<String>, allow_invalid: bool,
    ) -> Result<HashMap<String, CacheItem>, Error> {
        let result = self.inner.get_multiple(cids, allow_invalid).await;
        self.tolerate("get_multiple", result, HashMap::new())
    }

    async fn set_multiple(&self, entries: Vec<CacheEntry>) -> Result<(), Error> {
        let result = self.inner.set_multiple(entries).await;
        self.tolerate("set_multiple", result, ())
    }

    async fn delete_multiple(&self, cids: &[String]) -> Result<(), Error> {
        let result = self.inner.delete_multiple(cids).await;
        self.tolerate("delete_multiple", result, ())
    }

    async fn flush(&self) -> Result<(), Error> {
        let result = self.inner.flush().await;
        self.tolerate("flush", result, ())
    }

    async fn invalidate_multiple(&self, cids: &[String]) -> Result<(), Error> {
        let result = self.inner.invalidate_multiple(cids).await;
        self.tolerate("invalidate_multiple", result, ())
    }

    async fn invalidate_all(&self) -> Result<(), Error> {
        let result = self.inner.invalidate_all().await;
        self.tolerate("invalidate_all", result, ())
    }

    async fn expire(&self) -> Result<u64, Error> {
        let result = self.inner.expire().await;
        self.tolerate("expire", result, 0)
    }

    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), Error> {
        let result = self.inner.invalidate_tags(tags).await;
        self.tolerate("invalidate_tags", result, ())
    }

    async fn delete_tags(&self, tags: &[String]) -> Result<(), Error> {
        let result = self.inner.delete_tags(tags).await;
        self.tolerate("delete_tags", result, ())
    }

    async fn garbage_collection(&self) -> Result<u64, Error> {
        let result = self.inner.garbage_collection().await;
        self.tolerate("garbage_collection", result, 0)
    }

    async fn is_empty(&self) -> Result<bool, Error> {
        let result = self.inner.is_empty().await;
        self.tolerate("is_empty", result, true)
    }

    async fn remove_bin(&self) -> Result<(), Error> {
        let result = self.inner.remove_bin().await;
        self.tolerate("remove_bin", result, ())
    }
}
