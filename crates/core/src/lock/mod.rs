//! Advisory locks.
//!
//! Locks are cooperative: they only exclude other holders that ask for the
//! same name. Every lock carries an expiry so a crashed holder cannot keep
//! it forever; an expired lock may be taken over by anyone.
//!
//! ```text
//! (free) ─── acquire() ──→ held ─── release() ──→ (free)
//!                           │ │
//!             acquire() ↺ ──┘ └── expiry passes ──→ (may be taken over)
//! ```

pub mod database;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::Error;

pub use database::DatabaseLockBackend;
pub use memory::MemoryLockBackend;

/// Default lifetime of an acquired lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval upper bound for [`LockBackend::wait`].
const MAX_WAIT_STEP: Duration = Duration::from_millis(500);

/// Cooperative named locks.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Try to take `name` for `timeout`. Re-acquiring a lock this holder
    /// already owns extends it. Never blocks waiting for another holder.
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool, Error>;

    /// Whether `name` is free (or expired) right now.
    async fn lock_may_be_available(&self, name: &str) -> Result<bool, Error>;

    /// Release `name` if this holder owns it.
    async fn release(&self, name: &str) -> Result<(), Error>;

    /// Release every lock this holder owns.
    async fn release_all(&self) -> Result<(), Error>;

    /// Identifier of this holder.
    fn lock_id(&self) -> &str;

    /// Wait up to `max_wait` for `name` to become available.
    ///
    /// Returns true if the lock is still held by someone else after waiting.
    async fn wait(&self, name: &str, max_wait: Duration) -> Result<bool, Error> {
        let deadline = tokio::time::Instant::now() + max_wait;
        let mut step = Duration::from_millis(25);
        loop {
            if self.lock_may_be_available(name).await? {
                return Ok(false);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(true);
            }
            tokio::time::sleep(step.min(deadline - now)).await;
            step = (step * 2).min(MAX_WAIT_STEP);
        }
    }
}

pub(crate) fn new_lock_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
