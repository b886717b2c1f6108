//! In-process cache bin.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{CacheBackend, CacheEntry, CacheItem, Expiry, now_micros, prepare_item};
use crate::Error;
use crate::tags::{TagLedger, unique_tags, validate_tags};

/// Cache bin held in a concurrent map.
///
/// Items are cloned on the way in and out, so callers never share a
/// payload with the bin.
#[derive(Clone)]
pub struct MemoryBackend {
    bin: String,
    items: Arc<DashMap<String, CacheItem>>,
    ledger: Arc<dyn TagLedger>,
}

impl MemoryBackend {
    pub fn new(bin: &str, ledger: Arc<dyn TagLedger>) -> Self {
        Self { bin: bin.to_string(), items: Arc::new(DashMap::new()), ledger }
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    fn expire_now(&self, item: &mut CacheItem) {
        item.expire = Expiry::At(Utc::now() - chrono::Duration::seconds(1));
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get_multiple(
        &self, cids: &mut Vec<String>, allow_invalid: bool,
    ) -> Result<HashMap<String, CacheItem>, Error> {
        let now = Utc::now();
        let mut items = HashMap::new();
        for cid in cids.iter() {
            let Some(stored) = self.items.get(cid).map(|item| item.clone()) else {
                continue;
            };
            let current = self.ledger.checksum_tags(&stored.tags).await?;
            if let Some(item) = prepare_item(stored, &current, now, allow_invalid) {
                items.insert(cid.clone(), item);
            }
        }
        cids.retain(|cid| !items.contains_key(cid));
        Ok(items)
    }

    async fn set_multiple(&self, entries: Vec<CacheEntry>) -> Result<(), Error> {
        let created = now_micros();
        for entry in entries {
            if entry.cid.is_empty() {
                return Err(Error::InvalidInput("cache id must not be empty".into()));
            }
            validate_tags(&entry.tags)?;
            let tags = unique_tags(&entry.tags);
            let checksum = self.ledger.checksum_tags(&tags).await?;
            let item = CacheItem {
                cid: entry.cid.clone(),
                data: entry.data,
                created,
                expire: entry.expire,
                tags,
                checksum,
                valid: true,
            };
            self.items.insert(entry.cid, item);
        }
        Ok(())
    }

    async fn delete_multiple(&self, cids: &[String]) -> Result<(), Error> {
        for cid in cids {
            self.items.remove(cid);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        self.items.clear();
        Ok(())
    }

    async fn invalidate_multiple(&self, cids: &[String]) -> Result<(), Error> {
        for cid in cids {
            if let Some(mut item) = self.items.get_mut(cid) {
                self.expire_now(&mut item);
            }
        }
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), Error> {
        for mut item in self.items.iter_mut() {
            self.expire_now(&mut item);
        }
        Ok(())
    }

    async fn expire(&self) -> Result<u64, Error> {
        let now = Utc::now();
        let mut removed = 0u64;
        self.items.retain(|_, item| {
            let keep = !item.expire.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
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

        let tagged: Vec<(String, Vec<String>, u64)> = self
            .items
            .iter()
            .filter(|item| !item.tags.is_empty())
            .map(|item| (item.key().clone(), item.tags.clone(), item.checksum.deletions))
            .collect();

        let mut deleted = 0u64;
        for (cid, tags, deletions) in tagged {
            let current = self.ledger.checksum_tags(&tags).await?;
            if current.deletions != deletions && self.items.remove(&cid).is_some() {
                deleted += 1;
            }
        }
        Ok(expired + deleted)
    }

    async fn is_empty(&self) -> Result<bool, Error> {
        self.garbage_collection().await?;
        Ok(self.items.is_empty())
    }

    async fn remove_bin(&self) -> Result<(), Error> {
        self.items.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{Checksum, MemoryTagLedger};
    use serde_json::json;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn backend() -> (MemoryBackend, Arc<dyn TagLedger>) {
        let ledger: Arc<dyn TagLedger> = Arc::new(MemoryTagLedger::new());
        (MemoryBackend::new("render", ledger.clone()), ledger)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (cache, _) = backend();
        cache.set("a", json!({"n": 1}), Expiry::Permanent, &tags(&["node:1"])).await.unwrap();

        let item = cache.get("a", false).await.unwrap().unwrap();
        assert_eq!(item.data, json!({"n": 1}));
        assert!(item.valid);
        assert!(cache.get("b", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_then_delete_tag() {
        let (cache, ledger) = backend();
        cache.set("a", json!(1), Expiry::Permanent, &tags(&["node:1"])).await.unwrap();
        let written = cache.get("a", false).await.unwrap().unwrap();
        assert_eq!(written.checksum, Checksum::default());

        cache.invalidate_tags(&tags(&["node:1"])).await.unwrap();
        let stale = cache.get("a", true).await.unwrap().unwrap();
        assert!(!stale.valid);
        let status = written.checksum.status(&ledger.checksum_tags(&tags(&["node:1"])).await.unwrap());
        assert!(!status.valid && !status.deleted);

        cache.delete_tags(&tags(&["node:1"])).await.unwrap();
        assert!(cache.get("a", true).await.unwrap().is_none());
        let status = written.checksum.status(&ledger.checksum_tags(&tags(&["node:1"])).await.unwrap());
        assert!(status.deleted);
    }

    #[tokio::test]
    async fn test_get_multiple_removes_hits() {
        let (cache, _) = backend();
        cache.set("a", json!(1), Expiry::Permanent, &[]).await.unwrap();
        let mut cids = tags(&["a", "missing"]);
        let items = cache.get_multiple(&mut cids, false).await.unwrap();
        assert!(items.contains_key("a"));
        assert_eq!(cids, tags(&["missing"]));
    }

    #[tokio::test]
    async fn test_invalidate_and_expire() {
        let (cache, _) = backend();
        cache
            .set_multiple(vec![CacheEntry::new("a", json!(1)), CacheEntry::new("b", json!(2))])
            .await
            .unwrap();

        cache.invalidate("a").await.unwrap();
        assert!(cache.get("a", false).await.unwrap().is_none());
        assert!(cache.get("a", true).await.unwrap().is_some());

        assert_eq!(cache.expire().await.unwrap(), 1);
        assert!(cache.get("a", true).await.unwrap().is_none());

        cache.invalidate_all().await.unwrap();
        assert!(cache.get("b", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flush_and_is_empty() {
        let (cache, _) = backend();
        assert!(cache.is_empty().await.unwrap());
        cache.set("a", json!(1), Expiry::Permanent, &[]).await.unwrap();
        assert!(!cache.is_empty().await.unwrap());
        cache.flush().await.unwrap();
        assert!(cache.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_collection() {
        let (cache, _) = backend();
        cache
            .set_multiple(vec![
                CacheEntry::new("tagged", json!(1)).tags(tags(&["node:1"])),
                CacheEntry::new("kept", json!(2)).tags(tags(&["node:2"])),
            ])
            .await
            .unwrap();
        cache.delete_tags(&tags(&["node:1"])).await.unwrap();

        assert_eq!(cache.garbage_collection().await.unwrap(), 1);
        assert!(cache.get("kept", false).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_expire_counts_under_concurrent_writes() {
        let (cache, _) = backend();
        let past = Expiry::At(Utc::now() - chrono::Duration::seconds(1));

        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                for i in 0..500 {
                    cache.set(&format!("item:{i}"), json!(i), past, &[]).await.unwrap();
                }
            })
        };
        let expirers: Vec<_> = (0..3)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let mut removed = 0u64;
                    for _ in 0..200 {
                        removed += cache.expire().await.unwrap();
                        tokio::task::yield_now().await;
                    }
                    removed
                })
            })
            .collect();

        writer.await.unwrap();
        let mut removed = 0u64;
        for expirer in expirers {
            removed += expirer.await.unwrap();
        }
        removed += cache.expire().await.unwrap();
        assert_eq!(removed, 500);
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let (cache, _) = backend();
        let other = cache.clone();
        cache.set("a", json!(1), Expiry::Permanent, &[]).await.unwrap();
        assert!(other.get("a", false).await.unwrap().is_some());
    }
}
