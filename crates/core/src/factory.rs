//! Cache bin factory.
//!
//! Maps bin names to backends according to [`AppConfig`], builds each bin
//! once, and hands every bin the same tag ledger so a tag invalidated
//! through one bin is invalid in all of them.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::backend::{CacheBackend, DatabaseBackend, MemoryBackend, NullBackend, TolerantBackend, validate_bin};
use crate::collector::{CacheCollector, CacheMissResolver};
use crate::config::{AppConfig, BackendKind, LedgerKind};
use crate::lock::{DatabaseLockBackend, LockBackend, MemoryLockBackend};
use crate::tags::{Checksum, DatabaseTagLedger, MemoryTagLedger, TagLedger};
use crate::{CacheDb, Error};

/// Builds and owns cache bins.
#[derive(Clone)]
pub struct CacheFactory {
    config: Arc<AppConfig>,
    db: Option<CacheDb>,
    ledger: Arc<dyn TagLedger>,
    memory_locks: MemoryLockBackend,
    bins: Arc<DashMap<String, Arc<dyn CacheBackend>>>,
}

impl CacheFactory {
    /// Open the configured database (when needed) and build a factory.
    pub async fn from_config(config: AppConfig) -> Result<Self, Error> {
        let db = if config.needs_database() {
            tracing::info!(path = %config.db_path.display(), "opening cache database");
            Some(CacheDb::open(&config.db_path).await?)
        } else {
            None
        };
        Self::new(config, db)
    }

    /// Build a factory over an already opened database.
    ///
    /// Fails if a database component is configured but `db` is `None`.
    pub fn new(config: AppConfig, db: Option<CacheDb>) -> Result<Self, Error> {
        let ledger: Arc<dyn TagLedger> = match config.tag_ledger {
            LedgerKind::Database => Arc::new(DatabaseTagLedger::new(require_db(&db, "tag_ledger")?)),
            LedgerKind::Memory => Arc::new(MemoryTagLedger::new()),
        };
        Ok(Self {
            config: Arc::new(config),
            db,
            ledger,
            memory_locks: MemoryLockBackend::new(),
            bins: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The tag ledger shared by every bin.
    pub fn ledger(&self) -> Arc<dyn TagLedger> {
        Arc::clone(&self.ledger)
    }

    /// A new lock holder with its own lock id.
    ///
    /// Holders from the same factory exclude each other. They share the
    /// `semaphore` table when a database is open, a process-local registry
    /// otherwise.
    pub fn lock_holder(&self) -> Arc<dyn LockBackend> {
        match &self.db {
            Some(db) => Arc::new(DatabaseLockBackend::new(db.clone())),
            None => Arc::new(self.memory_locks.new_holder()),
        }
    }

    /// The backend for `bin`, built on first use.
    pub fn bin(&self, bin: &str) -> Result<Arc<dyn CacheBackend>, Error> {
        if let Some(backend) = self.bins.get(bin) {
            return Ok(Arc::clone(backend.value()));
        }
        validate_bin(bin)?;

        let kind = self.config.backend_for(bin);
        let mut backend: Arc<dyn CacheBackend> = match kind {
            BackendKind::Database => Arc::new(DatabaseBackend::new(
                require_db(&self.db, "default_backend")?,
                bin,
                self.ledger(),
            )?),
            BackendKind::Memory => Arc::new(MemoryBackend::new(bin, self.ledger())),
            BackendKind::Null => Arc::new(NullBackend),
        };
        if self.config.tolerate_store_errors && kind == BackendKind::Database {
            backend = Arc::new(TolerantBackend::new(backend));
        }
        tracing::debug!(bin, ?kind, "cache bin created");

        Ok(Arc::clone(self.bins.entry(bin.to_string()).or_insert(backend).value()))
    }

    /// Names of the bins built so far, sorted.
    pub fn bins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bins.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// A collector storing its row in `bin`, with a lock holder of its own.
    pub fn collector(
        &self, bin: &str, cid: impl Into<String>, resolver: Arc<dyn CacheMissResolver>,
    ) -> Result<CacheCollector, Error> {
        let lock_timeout: Duration = self.config.lock_timeout();
        Ok(CacheCollector::new(cid, self.bin(bin)?, self.lock_holder(), resolver).with_lock_timeout(lock_timeout))
    }

    /// Mark every item carrying one of `tags` invalid, in every bin.
    pub async fn invalidate_tags(&self, tags: &[String]) -> Result<(), Error> {
        tracing::debug!(?tags, "invalidating tags");
        self.ledger.invalidate_tags(tags).await
    }

    /// Make every item carrying one of `tags` unusable, in every bin.
    pub async fn delete_tags(&self, tags: &[String]) -> Result<(), Error> {
        tracing::debug!(?tags, "deleting tags");
        self.ledger.delete_tags(tags).await
    }

    pub async fn checksum_tags(&self, tags: &[String]) -> Result<Checksum, Error> {
        self.ledger.checksum_tags(tags).await
    }

    /// Run garbage collection on every bin built so far.
    pub async fn garbage_collection(&self) -> Result<u64, Error> {
        let backends: Vec<(String, Arc<dyn CacheBackend>)> =
            self.bins.iter().map(|entry| (entry.key().clone(), Arc::clone(entry.value()))).collect();

        let mut removed = 0;
        for (bin, backend) in backends {
            let count = backend.garbage_collection().await?;
            tracing::debug!(bin, count, "garbage collected");
            removed += count;
        }
        Ok(removed)
    }

    /// End-of-request hook: forget per-request tag state.
    ///
    /// Collector locks are released by the collector that took them.
    pub fn end_request(&self) {
        self.ledger.reset();
    }
}

fn require_db(db: &Option<CacheDb>, field: &str) -> Result<CacheDb, Error> {
    db.clone()
        .ok_or_else(|| Error::InvalidInput(format!("{field} is configured for the database but none is open")))
}
