//! Process-local lock backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{LockBackend, new_lock_id};
use crate::Error;

/// Locks shared by every holder created from the same registry.
#[derive(Debug, Clone)]
pub struct MemoryLockBackend {
    lock_id: String,
    locks: Arc<DashMap<String, (String, Instant)>>,
}

impl Default for MemoryLockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockBackend {
    /// A holder with a fresh, empty registry.
    pub fn new() -> Self {
        Self { lock_id: new_lock_id(), locks: Arc::new(DashMap::new()) }
    }

    /// Another holder competing for the same locks.
    pub fn new_holder(&self) -> Self {
        Self { lock_id: new_lock_id(), locks: Arc::clone(&self.locks) }
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool, Error> {
        let now = Instant::now();
        let expire = now + timeout.max(Duration::from_millis(1));
        let acquired = match self.locks.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let (owner, expires_at) = entry.get();
                if *owner == self.lock_id || *expires_at <= now {
                    entry.insert((self.lock_id.clone(), expire));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert((self.lock_id.clone(), expire));
                true
            }
        };
        Ok(acquired)
    }

    async fn lock_may_be_available(&self, name: &str) -> Result<bool, Error> {
        let now = Instant::now();
        Ok(self
            .locks
            .get(name)
            .is_none_or(|held| held.1 <= now))
    }

    async fn release(&self, name: &str) -> Result<(), Error> {
        self.locks.remove_if(name, |_, (owner, _)| *owner == self.lock_id);
        Ok(())
    }

    async fn release_all(&self) -> Result<(), Error> {
        self.locks.retain(|_, (owner, _)| *owner != self.lock_id);
        Ok(())
    }

    fn lock_id(&self) -> &str {
        &self.lock_id
    }
}
