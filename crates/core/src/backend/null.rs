//! Backend that caches nothing.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{CacheBackend, CacheEntry, CacheItem};
use crate::Error;

/// Always misses and accepts every write. Used to disable a bin.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

#[async_trait]
impl CacheBackend for NullBackend {
    async fn get_multiple(
        &self, _cids: &mut Vec<String>, _allow_invalid: bool,
    ) -> Result<HashMap<String, CacheItem>, Error> {
        Ok(HashMap::new())
    }

    async fn set_multiple(&self, _entries: Vec<CacheEntry>) -> Result<(), Error> {
        Ok(())
    }

    async fn delete_multiple(&self, _cids: &[String]) -> Result<(), Error> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn invalidate_multiple(&self, _cids: &[String]) -> Result<(), Error> {
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn expire(&self) -> Result<u64, Error> {
        Ok(0)
    }

    async fn invalidate_tags(&self, _tags: &[String]) -> Result<(), Error> {
        Ok(())
    }

    async fn delete_tags(&self, _tags: &[String]) -> Result<(), Error> {
        Ok(())
    }

    async fn garbage_collection(&self) -> Result<u64, Error> {
        Ok(0)
    }

    async fn is_empty(&self) -> Result<bool, Error> {
        Ok(true)
    }

    async fn remove_bin(&self) -> Result<(), Error> {
        Ok(())
    }
}
