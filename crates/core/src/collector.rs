//! Cache collector: many small values stored in one cache row.
//!
//! A collector lazily loads its row, answers lookups from it, resolves
//! misses through a [`CacheMissResolver`], and writes the accumulated
//! changes back once at the end of the request via [`CacheCollector::commit`].
//!
//! Any local `set` or `delete` immediately invalidates the physical row so
//! that other requests rebuild rather than read a partially updated
//! aggregate. At commit time the row is rewritten only if nobody else
//! replaced it in the meantime; otherwise the row is deleted and the write
//! abandoned.
//!
//! Per key:
//!
//! ```text
//! unset ──→ loaded ──→ changed locally ──→ persist | remove flag ──→ commit
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::Error;
use crate::backend::{CacheBackend, Expiry};
use crate::lock::{DEFAULT_LOCK_TIMEOUT, LockBackend};

/// Computes values the collector's row does not hold yet.
#[async_trait]
pub trait CacheMissResolver: Send + Sync {
    /// Produce the value for `key`, or `None` if it has none.
    async fn resolve(&self, key: &str) -> Result<Option<Value>, Error>;
}

/// What [`CacheCollector::commit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing was pending.
    Clean,
    /// The row was written.
    Written,
    /// Another holder had the lock; pending changes were dropped.
    LockUnavailable,
    /// The row changed since it was loaded; it was deleted instead.
    Abandoned,
}

/// Aggregates many keys into the cache row `cid`.
pub struct CacheCollector {
    cid: String,
    tags: Vec<String>,
    cache: Arc<dyn CacheBackend>,
    lock: Arc<dyn LockBackend>,
    resolver: Arc<dyn CacheMissResolver>,
    lock_timeout: Duration,
    storage: HashMap<String, Value>,
    keys_to_persist: BTreeSet<String>,
    keys_to_remove: BTreeSet<String>,
    cache_loaded: bool,
    cache_created: Option<DateTime<Utc>>,
    cache_invalidated: bool,
}

impl CacheCollector {
    pub fn new(
        cid: impl Into<String>, cache: Arc<dyn CacheBackend>, lock: Arc<dyn LockBackend>,
        resolver: Arc<dyn CacheMissResolver>,
    ) -> Self {
        Self {
            cid: cid.into(),
            tags: Vec::new(),
            cache,
            lock,
            resolver,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            storage: HashMap::new(),
            keys_to_persist: BTreeSet::new(),
            keys_to_remove: BTreeSet::new(),
            cache_loaded: false,
            cache_created: None,
            cache_invalidated: false,
        }
    }

    /// Tags written with the row. With tags, [`clear`](Self::clear) invalidates them.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    fn lock_name(&self) -> String {
        format!("{}:collector", self.cid)
    }

    async fn lazy_load(&mut self) -> Result<(), Error> {
        if self.cache_loaded {
            return Ok(());
        }
        if let Some(item) = self.cache.get(&self.cid, false).await? {
            self.cache_created = Some(item.created);
            if let Value::Object(map) = item.data {
                self.storage = map.into_iter().collect();
            }
        }
        self.cache_loaded = true;
        Ok(())
    }

    async fn invalidate_cache(&mut self) -> Result<(), Error> {
        self.cache.invalidate(&self.cid).await?;
        self.cache_invalidated = true;
        Ok(())
    }

    /// Look up `key`, resolving and flagging it for persistence on a miss.
    pub async fn get(&mut self, key: &str) -> Result<Option<Value>, Error> {
        self.lazy_load().await?;
        if let Some(value) = self.storage.get(key) {
            return Ok(Some(value.clone()));
        }
        let resolved = self.resolver.resolve(key).await?;
        if let Some(value) = &resolved {
            self.storage.insert(key.to_string(), value.clone());
            self.persist(key);
        }
        Ok(resolved)
    }

    pub async fn has(&mut self, key: &str) -> Result<bool, Error> {
        Ok(self.get(key).await?.is_some())
    }

    /// Set `key` locally. The row is invalidated; the value is written only if persisted.
    pub async fn set(&mut self, key: &str, value: Value) -> Result<(), Error> {
        self.lazy_load().await?;
        self.storage.insert(key.to_string(), value);
        self.keys_to_remove.remove(key);
        self.invalidate_cache().await
    }

    /// Remove `key` locally and from the row at commit time.
    pub async fn delete(&mut self, key: &str) -> Result<(), Error> {
        self.lazy_load().await?;
        self.storage.remove(key);
        self.keys_to_persist.remove(key);
        self.keys_to_remove.insert(key.to_string());
        self.invalidate_cache().await
    }

    /// Flag `key` to be written back at commit time.
    pub fn persist(&mut self, key: &str) {
        self.keys_to_persist.insert(key.to_string());
    }

    /// Forget all local state; the next access reloads the row.
    pub fn reset(&mut self) {
        self.storage.clear();
        self.keys_to_persist.clear();
        self.keys_to_remove.clear();
        self.cache_loaded = false;
    }

    /// Reset and drop the row, through its tags if it has any.
    pub async fn clear(&mut self) -> Result<(), Error> {
        self.reset();
        if self.tags.is_empty() {
            self.cache.delete(&self.cid).await
        } else {
            self.cache.invalidate_tags(&self.tags).await
        }
    }

    /// Write pending changes back to the row. Call once at the end of the request.
    pub async fn commit(&mut self) -> Result<CommitOutcome, Error> {
        let mut data: Map<String, Value> = self
            .keys_to_persist
            .iter()
            .filter_map(|key| self.storage.get(key).map(|value| (key.clone(), value.clone())))
            .collect();
        if data.is_empty() && self.keys_to_remove.is_empty() {
            return Ok(CommitOutcome::Clean);
        }

        let lock_name = self.lock_name();
        if !self.lock.acquire(&lock_name, self.lock_timeout).await? {
            tracing::debug!(cid = %self.cid, "collector lock unavailable, skipping write");
            self.clear_pending();
            return Ok(CommitOutcome::LockUnavailable);
        }

        let outcome = self.merge_and_write(&mut data).await;
        self.lock.release(&lock_name).await?;
        self.clear_pending();
        outcome
    }

    async fn merge_and_write(&self, data: &mut Map<String, Value>) -> Result<CommitOutcome, Error> {
        // Our own set/delete invalidated the row, so read it allowing invalid data.
        if let Some(item) = self.cache.get(&self.cid, self.cache_invalidated).await? {
            if self.cache_invalidated && Some(item.created) != self.cache_created {
                tracing::warn!(cid = %self.cid, "collector row changed concurrently, abandoning write");
                self.cache.delete(&self.cid).await?;
                return Ok(CommitOutcome::Abandoned);
            }
            if let Value::Object(existing) = item.data {
                for (key, value) in existing {
                    data.entry(key).or_insert(value);
                }
            }
        }

        for key in &self.keys_to_remove {
            data.remove(key);
        }
        self.cache
            .set(&self.cid, Value::Object(std::mem::take(data)), Expiry::Permanent, &self.tags)
            .await?;
        Ok(CommitOutcome::Written)
    }

    fn clear_pending(&mut self) {
        self.keys_to_persist.clear();
        self.keys_to_remove.clear();
    }
}
