//! SQLite-backed lock backend.
//!
//! Locks are rows in the `semaphore` table keyed by name. The `value`
//! column holds the owner's lock id and `expire` the unix-millis deadline.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use tokio_rusqlite::{params, rusqlite};
use rusqlite::OptionalExtension;

use super::{LockBackend, new_lock_id};
use crate::{CacheDb, Error};

/// Locks visible to every process sharing the database.
#[derive(Debug)]
pub struct DatabaseLockBackend {
    db: CacheDb,
    lock_id: String,
    held: DashSet<String>,
}

impl DatabaseLockBackend {
    pub fn new(db: CacheDb) -> Self {
        Self { db, lock_id: new_lock_id(), held: DashSet::new() }
    }
}

fn deadline(timeout: Duration) -> i64 {
    let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX / 2).max(1);
    Utc::now().timestamp_millis().saturating_add(millis)
}

#[async_trait]
impl LockBackend for DatabaseLockBackend {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool, Error> {
        let name_owned = name.to_string();
        let lock_id = self.lock_id.clone();
        let expire = deadline(timeout);

        if self.held.contains(name) {
            let extended = self
                .db
                .conn
                .call(move |conn| {
                    conn.execute(
                        "UPDATE semaphore SET expire = ?1 WHERE name = ?2 AND value = ?3",
                        params![expire, name_owned, lock_id],
                    )
                })
                .await
                .map_err(Error::from)?;
            if extended == 0 {
                tracing::debug!(lock = name, "held lock was broken");
                self.held.remove(name);
            }
            return Ok(extended > 0);
        }

        let acquired = self
            .db
            .conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let insert = "INSERT OR IGNORE INTO semaphore (name, value, expire) VALUES (?1, ?2, ?3)";
                if conn.execute(insert, params![name_owned, lock_id, expire])? == 1 {
                    return Ok(true);
                }
                let now = Utc::now().timestamp_millis();
                let stale = conn.execute(
                    "DELETE FROM semaphore WHERE name = ?1 AND expire < ?2",
                    params![name_owned, now],
                )?;
                if stale == 0 {
                    return Ok(false);
                }
                Ok(conn.execute(insert, params![name_owned, lock_id, expire])? == 1)
            })
            .await
            .map_err(Error::from)?;

        if acquired {
            self.held.insert(name.to_string());
        }
        tracing::debug!(lock = name, acquired, "lock acquire");
        Ok(acquired)
    }

    async fn lock_may_be_available(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let held: Option<(String, i64)> = conn
                    .query_row(
                        "SELECT value, expire FROM semaphore WHERE name = ?1",
                        params![name],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((owner, expire)) = held else {
                    return Ok(true);
                };
                if Utc::now().timestamp_millis() <= expire {
                    return Ok(false);
                }
                let removed = conn.execute(
                    "DELETE FROM semaphore WHERE name = ?1 AND value = ?2 AND expire = ?3",
                    params![name, owner, expire],
                )?;
                Ok(removed > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn release(&self, name: &str) -> Result<(), Error> {
        self.held.remove(name);
        let name = name.to_string();
        let lock_id = self.lock_id.clone();
        self.db
            .conn
            .call(move |conn| {
                conn.execute("DELETE FROM semaphore WHERE name = ?1 AND value = ?2", params![name, lock_id])
            })
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn release_all(&self) -> Result<(), Error> {
        self.held.clear();
        let lock_id = self.lock_id.clone();
        self.db
            .conn
            .call(move |conn| conn.execute("DELETE FROM semaphore WHERE value = ?1", params![lock_id]))
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    fn lock_id(&self) -> &str {
        &self.lock_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn holders() -> (DatabaseLockBackend, DatabaseLockBackend) {
        let db = CacheDb::open_in_memory().await.unwrap();
        (DatabaseLockBackend::new(db.clone()), DatabaseLockBackend::new(db))
    }

    #[tokio::test]
    async fn test_acquire_excludes_other_holder() {
        let (first, second) = holders().await;

        assert!(first.acquire("menu", Duration::from_secs(30)).await.unwrap());
        assert!(!second.acquire("menu", Duration::from_secs(30)).await.unwrap());
        assert!(!second.lock_may_be_available("menu").await.unwrap());

        first.release("menu").await.unwrap();
        assert!(second.lock_may_be_available("menu").await.unwrap());
        assert!(second.acquire("menu", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_reacquire_extends() {
        let (first, second) = holders().await;
        assert!(first.acquire("menu", Duration::from_millis(50)).await.unwrap());
        assert!(first.acquire("menu", Duration::from_secs(30)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.acquire("menu", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_taken_over() {
        let (first, second) = holders().await;
        assert!(first.acquire("menu", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(second.acquire("menu", Duration::from_secs(30)).await.unwrap());
        // The original holder notices its lock was broken.
        assert!(!first.acquire("menu", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_all() {
        let (first, second) = holders().await;
        assert!(first.acquire("a", Duration::from_secs(30)).await.unwrap());
        assert!(first.acquire("b", Duration::from_secs(30)).await.unwrap());
        assert!(second.acquire("c", Duration::from_secs(30)).await.unwrap());

        first.release_all().await.unwrap();
        assert!(second.acquire("a", Duration::from_secs(30)).await.unwrap());
        assert!(second.acquire("b", Duration::from_secs(30)).await.unwrap());
        assert!(!first.acquire("c", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_release() {
        let (first, second) = holders().await;
        assert!(first.acquire("menu", Duration::from_millis(60)).await.unwrap());
        assert!(!second.wait("menu", Duration::from_secs(2)).await.unwrap());
        assert_ne!(first.lock_id(), second.lock_id());
    }
}
