//! SQLite-backed tag ledger.
//!
//! Counters live in the `cache_tags` table so that every process sharing
//! the database sees the same ledger. Counters read during a request are
//! cached in-process until the tag is touched again or the request ends.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio_rusqlite::{params, rusqlite};

use super::{Checksum, TagLedger, unique_tags, validate_tags};
use crate::{CacheDb, Error};

/// Tag counters persisted in the `cache_tags` table.
#[derive(Debug)]
pub struct DatabaseTagLedger {
    db: CacheDb,
    counters: DashMap<String, Checksum>,
    deleted: DashSet<String>,
}

impl DatabaseTagLedger {
    pub fn new(db: CacheDb) -> Self {
        Self { db, counters: DashMap::new(), deleted: DashSet::new() }
    }

    async fn bump(&self, tags: Vec<String>, column: &'static str) -> Result<(), Error> {
        if tags.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT INTO cache_tags (tag, {column}) VALUES (?1, 1)
             ON CONFLICT(tag) DO UPDATE SET {column} = {column} + 1"
        );
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(&sql)?;
                    for tag in &tags {
                        stmt.execute(params![tag])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn load(&self, tags: Vec<String>) -> Result<Vec<(String, Checksum)>, Error> {
        self.db
            .conn
            .call(move |conn| -> Result<Vec<(String, Checksum)>, Error> {
                let placeholders = vec!["?"; tags.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT tag, invalidations, deletions FROM cache_tags WHERE tag IN ({placeholders})"
                ))?;
                let rows = stmt.query_map(rusqlite::params_from_iter(tags.iter()), |row| {
                    let tag: String = row.get(0)?;
                    let invalidations: i64 = row.get(1)?;
                    let deletions: i64 = row.get(2)?;
                    Ok((tag, Checksum::new(invalidations as u64, deletions as u64)))
                })?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl TagLedger for DatabaseTagLedger {
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), Error> {
        validate_tags(tags)?;
        let tags = unique_tags(tags);
        for tag in &tags {
            self.counters.remove(tag);
            self.deleted.remove(tag);
        }
        tracing::debug!(tags = ?tags, "invalidating tags");
        self.bump(tags, "invalidations").await
    }

    async fn delete_tags(&self, tags: &[String]) -> Result<(), Error> {
        validate_tags(tags)?;
        let fresh: Vec<String> = unique_tags(tags)
            .into_iter()
            .filter(|tag| self.deleted.insert(tag.clone()))
            .collect();
        for tag in &fresh {
            self.counters.remove(tag);
        }
        tracing::debug!(tags = ?fresh, "deleting tags");
        let result = self.bump(fresh.clone(), "deletions").await;
        if result.is_err() {
            // Not counted, so a retry in this request must bump again.
            for tag in &fresh {
                self.deleted.remove(tag);
            }
        }
        result
    }

    async fn checksum_tags(&self, tags: &[String]) -> Result<Checksum, Error> {
        let missing: Vec<String> = unique_tags(tags)
            .into_iter()
            .filter(|tag| !self.counters.contains_key(tag))
            .collect();

        if !missing.is_empty() {
            let found = self.load(missing.clone()).await?;
            for tag in missing {
                self.counters.insert(tag, Checksum::default());
            }
            for (tag, checksum) in found {
                self.counters.insert(tag, checksum);
            }
        }

        Ok(tags
            .iter()
            .map(|tag| self.counters.get(tag).map(|c| *c).unwrap_or_default())
            .sum())
    }

    fn reset(&self) {
        self.counters.clear();
        self.deleted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_unknown_tag_is_zero() {
        let ledger = DatabaseTagLedger::new(CacheDb::open_in_memory().await.unwrap());
        let checksum = ledger.checksum_tags(&tags(&["node:1", "node:2"])).await.unwrap();
        assert_eq!(checksum, Checksum::default());
    }

    #[tokio::test]
    async fn test_invalidate_counts_every_call() {
        let ledger = DatabaseTagLedger::new(CacheDb::open_in_memory().await.unwrap());
        for _ in 0..3 {
            ledger.invalidate_tags(&tags(&["node:1"])).await.unwrap();
        }
        let checksum = ledger.checksum_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(checksum, Checksum::new(3, 0));
    }

    #[tokio::test]
    async fn test_invalidate_after_cached_read() {
        let ledger = DatabaseTagLedger::new(CacheDb::open_in_memory().await.unwrap());
        assert_eq!(ledger.checksum_tags(&tags(&["node:1"])).await.unwrap(), Checksum::default());

        ledger.invalidate_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(ledger.checksum_tags(&tags(&["node:1"])).await.unwrap(), Checksum::new(1, 0));
    }

    #[tokio::test]
    async fn test_delete_deduplicated_within_request() {
        let ledger = DatabaseTagLedger::new(CacheDb::open_in_memory().await.unwrap());
        ledger.delete_tags(&tags(&["node:1"])).await.unwrap();
        ledger.delete_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(ledger.checksum_tags(&tags(&["node:1"])).await.unwrap().deletions, 1);

        ledger.invalidate_tags(&tags(&["node:1"])).await.unwrap();
        ledger.delete_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(ledger.checksum_tags(&tags(&["node:1"])).await.unwrap(), Checksum::new(1, 2));
    }

    async fn rename_table(db: &CacheDb, from: &'static str, to: &'static str) {
        db.conn
            .call(move |conn| conn.execute_batch(&format!("ALTER TABLE {from} RENAME TO {to}")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_delete_is_retried_in_same_request() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let ledger = DatabaseTagLedger::new(db.clone());

        rename_table(&db, "cache_tags", "cache_tags_moved").await;
        assert!(ledger.delete_tags(&tags(&["node:1"])).await.is_err());
        rename_table(&db, "cache_tags_moved", "cache_tags").await;

        ledger.delete_tags(&tags(&["node:1"])).await.unwrap();
        ledger.reset();
        assert_eq!(ledger.checksum_tags(&tags(&["node:1"])).await.unwrap().deletions, 1);
    }

    #[tokio::test]
    async fn test_counters_visible_to_other_process_after_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");
        let writer = DatabaseTagLedger::new(CacheDb::open(&path).await.unwrap());
        let reader = DatabaseTagLedger::new(CacheDb::open(&path).await.unwrap());

        assert_eq!(reader.checksum_tags(&tags(&["node:1"])).await.unwrap(), Checksum::default());
        writer.invalidate_tags(&tags(&["node:1"])).await.unwrap();

        // Counters read earlier in the request are kept until it ends.
        assert_eq!(reader.checksum_tags(&tags(&["node:1"])).await.unwrap(), Checksum::default());
        reader.reset();
        assert_eq!(reader.checksum_tags(&tags(&["node:1"])).await.unwrap(), Checksum::new(1, 0));
    }

    #[tokio::test]
    async fn test_checksum_sums_across_tags() {
        let ledger = DatabaseTagLedger::new(CacheDb::open_in_memory().await.unwrap());
        ledger.invalidate_tags(&tags(&["node:1", "node:2"])).await.unwrap();
        ledger.delete_tags(&tags(&["node:2"])).await.unwrap();

        let checksum = ledger.checksum_tags(&tags(&["node:1", "node:2", "node:3"])).await.unwrap();
        assert_eq!(checksum, Checksum::new(2, 1));
    }
}
