//! SQLite-backed cache bin.
//!
//! Each bin owns one table named `cache_<bin>`. The table is created on the
//! first write; until then reads are misses and deletes are no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{params, rusqlite};

use super::{CacheBackend, CacheEntry, CacheItem, Expiry, PERMANENT_MILLIS, now_micros, prepare_item, validate_bin};
use crate::cache::normalize_cid;
use crate::tags::{Checksum, TagLedger, unique_tags, validate_tags};
use crate::{CacheDb, Error};

/// Rows per statement when a call touches many cids.
const CHUNK_SIZE: usize = 500;

/// Column values of one row to write: cid, data, expire, created, tags, invalidations, deletions.
type RowValues = (String, String, i64, i64, String, i64, i64);

/// Cache bin stored in a SQLite table.
#[derive(Clone)]
pub struct DatabaseBackend {
    bin: String,
    table: String,
    db: CacheDb,
    ledger: Arc<dyn TagLedger>,
}

/// A row as read from the bin table, before the read rules are applied.
struct StoredRow {
    cid: String,
    data: String,
    expire: i64,
    created: i64,
    tags: String,
    checksum_invalidations: i64,
    checksum_deletions: i64,
}

impl StoredRow {
    fn into_item(self, cid: String) -> Result<CacheItem, Error> {
        Ok(CacheItem {
            cid,
            data: serde_json::from_str(&self.data)?,
            created: DateTime::from_timestamp_micros(self.created).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            expire: Expiry::from_millis(self.expire),
            tags: split_tags(&self.tags),
            checksum: Checksum::new(self.checksum_invalidations as u64, self.checksum_deletions as u64),
            valid: true,
        })
    }
}

fn split_tags(tags: &str) -> Vec<String> {
    tags.split_whitespace().map(str::to_string).collect()
}

/// Map SQLite failures on a bin table to the cache error taxonomy.
///
/// A missing table means the bin was never written and is recoverable. A
/// missing column means the table is not ours and must be surfaced.
fn classify(table: &str, err: tokio_rusqlite::Error<rusqlite::Error>) -> Error {
    if let tokio_rusqlite::Error::Error(rusqlite::Error::SqliteFailure(_, Some(msg))) = &err {
        if msg.starts_with("no such table") {
            return Error::MissingBin(table.to_string());
        }
        if msg.contains("no such column") || msg.contains("has no column named") {
            return Error::SchemaBroken(format!("{table}: {msg}"));
        }
    }
    Error::from(err)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl DatabaseBackend {
    /// Create a backend for `bin`. No table is created until the first write.
    pub fn new(db: CacheDb, bin: &str, ledger: Arc<dyn TagLedger>) -> Result<Self, Error> {
        validate_bin(bin)?;
        Ok(Self { bin: bin.to_string(), table: format!("cache_{bin}"), db, ledger })
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the bin table if it does not exist.
    pub async fn ensure_bin_exists(&self) -> Result<(), Error> {
        let table = self.table.clone();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                cid TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL,
                expire INTEGER NOT NULL DEFAULT -1,
                created INTEGER NOT NULL,
                tags TEXT NOT NULL DEFAULT '',
                checksum_invalidations INTEGER NOT NULL DEFAULT 0,
                checksum_deletions INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_expire ON {table}(expire);"
        );
        self.db
            .conn
            .call(move |conn| conn.execute_batch(&sql))
            .await
            .map_err(|e| classify(&self.table, e))?;
        tracing::debug!(bin = %self.bin, "created cache bin table");
        Ok(())
    }

    /// Run a statement that may hit a missing table, treating absence as "nothing to do".
    async fn execute_tolerant<F>(&self, op: F) -> Result<u64, Error>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<u64, rusqlite::Error> + Send + 'static,
    {
        match self.db.conn.call(op).await.map_err(|e| classify(&self.table, e)) {
            Ok(count) => Ok(count),
            Err(Error::MissingBin(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn write_rows(&self, rows: Vec<RowValues>) -> Result<(), Error> {
        let sql = format!(
            "INSERT INTO {} (cid, data, expire, created, tags, checksum_invalidations, checksum_deletions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(cid) DO UPDATE SET
                data = excluded.data,
                expire = excluded.expire,
                created = excluded.created,
                tags = excluded.tags,
                checksum_invalidations = excluded.checksum_invalidations,
                checksum_deletions = excluded.checksum_deletions",
            self.table
        );
        self.db
            .conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(&sql)?;
                    for (cid, data, expire, created, tags, invalidations, deletions) in &rows {
                        stmt.execute(params![cid, data, expire, created, tags, invalidations, deletions])?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(|e| classify(&self.table, e))
    }

    async fn load_rows(&self, cids: Vec<String>) -> Result<Vec<StoredRow>, Error> {
        let table = self.table.clone();
        self.db
            .conn
            .call(move |conn| -> Result<Vec<StoredRow>, rusqlite::Error> {
                let mut rows = Vec::new();
                for chunk in cids.chunks(CHUNK_SIZE) {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT cid, data, expire, created, tags, checksum_invalidations, checksum_deletions
                         FROM {table} WHERE cid IN ({})",
                        placeholders(chunk.len())
                    ))?;
                    let found = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                        Ok(StoredRow {
                            cid: row.get(0)?,
                            data: row.get(1)?,
                            expire: row.get(2)?,
                            created: row.get(3)?,
                            tags: row.get(4)?,
                            checksum_invalidations: row.get(5)?,
                            checksum_deletions: row.get(6)?,
                        })
                    })?;
                    for row in found {
                        rows.push(row?);
                    }
                }
                Ok(rows)
            })
            .await
            .map_err(|e| classify(&self.table, e))
    }

    /// Run `sql_prefix WHERE cid IN (...)` over `cids` in chunks, binding `value` first if given.
    async fn update_cids(&self, sql_prefix: String, value: Option<i64>, cids: Vec<String>) -> Result<u64, Error> {
        self.execute_tolerant(move |conn| {
            let tx = conn.transaction()?;
            let mut total = 0u64;
            for chunk in cids.chunks(CHUNK_SIZE) {
                let sql = format!("{sql_prefix} WHERE cid IN ({})", placeholders(chunk.len()));
                let mut args: Vec<rusqlite::types::Value> = Vec::with_capacity(chunk.len() + 1);
                if let Some(value) = value {
                    args.push(value.into());
                }
                args.extend(chunk.iter().map(|cid| rusqlite::types::Value::from(cid.clone())));
                total += tx.execute(&sql, rusqlite::params_from_iter(args))? as u64;
            }
            tx.commit()?;
            Ok(total)
        })
        .await
    }
}

#[async_trait]
impl CacheBackend for DatabaseBackend {
    async fn get_multiple(
        &self, cids: &mut Vec<String>, allow_invalid: bool,
    ) -> Result<HashMap<String, CacheItem>, Error> {
        if cids.is_empty() {
            return Ok(HashMap::new());
        }

        let normalized: HashMap<String, String> = cids.iter().map(|cid| (normalize_cid(cid), cid.clone())).collect();
        let rows = match self.load_rows(normalized.keys().cloned().collect()).await {
            Ok(rows) => rows,
            Err(Error::MissingBin(_)) => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let mut items = HashMap::new();
        for row in rows {
            let Some(cid) = normalized.get(&row.cid) else {
                continue;
            };
            let item = row.into_item(cid.clone())?;
            let current = self.ledger.checksum_tags(&item.tags).await?;
            if let Some(item) = prepare_item(item, &current, now, allow_invalid) {
                items.insert(cid.clone(), item);
            }
        }

        cids.retain(|cid| !items.contains_key(cid));
        tracing::debug!(bin = %self.bin, hits = items.len(), misses = cids.len(), "cache lookup");
        Ok(items)
    }

    async fn set_multiple(&self, entries: Vec<CacheEntry>) -> Result<(), Error> {
        let created = now_micros().timestamp_micros();
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.cid.is_empty() {
                return Err(Error::InvalidInput("cache id must not be empty".into()));
            }
            validate_tags(&entry.tags)?;
            let tags = unique_tags(&entry.tags);
            let checksum = self.ledger.checksum_tags(&tags).await?;
            rows.push((
                normalize_cid(&entry.cid),
                serde_json::to_string(&entry.data)?,
                entry.expire.to_millis(),
                created,
                tags.join(" "),
                checksum.invalidations as i64,
                checksum.deletions as i64,
            ));
        }
        if rows.is_empty() {
            return Ok(());
        }

        match self.write_rows(rows.clone()).await {
            Err(Error::MissingBin(_)) => {
                self.ensure_bin_exists().await?;
                self.write_rows(rows).await
            }
            other => other,
        }
    }

    async fn delete_multiple(&self, cids: &[String]) -> Result<(), Error> {
        if cids.is_empty() {
            return Ok(());
        }
        let normalized: Vec<String> = cids.iter().map(|cid| normalize_cid(cid)).collect();
        self.update_cids(format!("DELETE FROM {}", self.table), None, normalized)
            .await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let sql = format!("DELETE FROM {}", self.table);
        self.execute_tolerant(move |conn| Ok(conn.execute(&sql, [])? as u64))
            .await?;
        Ok(())
    }

    async fn invalidate_multiple(&self, cids: &[String]) -> Result<(), Error> {
        if cids.is_empty() {
            return Ok(());
        }
        let normalized: Vec<String> = cids.iter().map(|cid| normalize_cid(cid)).collect();
        let past = Utc::now().timestamp_millis() - 1000;
        self.update_cids(format!("UPDATE {} SET expire = ?", self.table), Some(past), normalized)
            .await?;
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), Error> {
        let sql = format!("UPDATE {} SET expire = ?1", self.table);
        let past = Utc::now().timestamp_millis() - 1000;
        self.execute_tolerant(move |conn| Ok(conn.execute(&sql, params![past])? as u64))
            .await?;
        Ok(())
    }

    async fn expire(&self) -> Result<u64, Error> {
        let sql = format!("DELETE FROM {} WHERE expire <> ?1 AND expire < ?2", self.table);
        let now = Utc::now().timestamp_millis();
        let removed = self
            .execute_tolerant(move |conn| Ok(conn.execute(&sql, params![PERMANENT_MILLIS, now])? as u64))
            .await?;
        if removed > 0 {
            tracing::debug!(bin = %self.bin, removed, "expired cache items");
        }
        Ok(removed)
    }

    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), Error> {
        self.ledger.invalidate_tags(tags).await
    }

    async fn delete_tags(&self, tags: &[String]) -> Result<(), Error> {
        self.ledger.delete_tags(tags).await
    }

    async fn garbage_collection(&self) -> Result<u64, Error> {
        let expired = self.expire().await?;

        let sql = format!("SELECT cid, tags, checksum_deletions FROM {} WHERE tags <> ''", self.table);
        let tagged = match self
            .db
            .conn
            .call(move |conn| -> Result<Vec<(String, String, i64)>, rusqlite::Error> {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
                rows.collect()
            })
            .await
            .map_err(|e| classify(&self.table, e))
        {
            Ok(rows) => rows,
            Err(Error::MissingBin(_)) => return Ok(expired),
            Err(e) => return Err(e),
        };

        let mut doomed = Vec::new();
        for (cid, tags, deletions) in tagged {
            let current = self.ledger.checksum_tags(&split_tags(&tags)).await?;
            if current.deletions != deletions as u64 {
                doomed.push(cid);
            }
        }
        let deleted = if doomed.is_empty() {
            0
        } else {
            self.update_cids(format!("DELETE FROM {}", self.table), None, doomed)
                .await?
        };

        tracing::debug!(bin = %self.bin, expired, deleted, "cache garbage collection");
        Ok(expired + deleted)
    }

    async fn is_empty(&self) -> Result<bool, Error> {
        self.garbage_collection().await?;
        let sql = format!("SELECT NOT EXISTS(SELECT 1 FROM {})", self.table);
        match self
            .db
            .conn
            .call(move |conn| conn.query_row(&sql, [], |row| row.get::<_, bool>(0)))
            .await
            .map_err(|e| classify(&self.table, e))
        {
            Ok(empty) => Ok(empty),
            Err(Error::MissingBin(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn remove_bin(&self) -> Result<(), Error> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.table);
        self.db
            .conn
            .call(move |conn| conn.execute_batch(&sql))
            .await
            .map_err(|e| classify(&self.table, e))?;
        tracing::debug!(bin = %self.bin, "removed cache bin table");
        Ok(())
    }
}
