//! In-process tag ledger.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::{Checksum, TagLedger, unique_tags, validate_tags};
use crate::Error;

/// Tag counters held in memory.
///
/// Suitable for a single process, tests, and bins that live no longer than
/// the process itself.
#[derive(Debug, Default)]
pub struct MemoryTagLedger {
    counters: DashMap<String, Checksum>,
    deleted: DashSet<String>,
}

impl MemoryTagLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TagLedger for MemoryTagLedger {
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), Error> {
        validate_tags(tags)?;
        let tags = unique_tags(tags);
        let count = tags.len();
        for tag in tags {
            self.deleted.remove(&tag);
            self.counters.entry(tag).or_default().invalidations += 1;
        }
        tracing::debug!(count, "invalidated tags");
        Ok(())
    }

    async fn delete_tags(&self, tags: &[String]) -> Result<(), Error> {
        validate_tags(tags)?;
        for tag in unique_tags(tags) {
            if self.deleted.insert(tag.clone()) {
                self.counters.entry(tag).or_default().deletions += 1;
            }
        }
        Ok(())
    }

    async fn checksum_tags(&self, tags: &[String]) -> Result<Checksum, Error> {
        Ok(tags
            .iter()
            .map(|tag| self.counters.get(tag).map(|c| *c).unwrap_or_default())
            .sum())
    }

    fn reset(&self) {
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
        let ledger = MemoryTagLedger::new();
        let checksum = ledger.checksum_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(checksum, Checksum::default());
    }

    #[tokio::test]
    async fn test_invalidate_counts_every_call() {
        let ledger = MemoryTagLedger::new();
        for _ in 0..4 {
            ledger.invalidate_tags(&tags(&["node:1"])).await.unwrap();
        }
        let checksum = ledger.checksum_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(checksum.invalidations, 4);
        assert_eq!(checksum.deletions, 0);
    }

    #[tokio::test]
    async fn test_invalidate_duplicate_tag_in_one_call() {
        let ledger = MemoryTagLedger::new();
        ledger.invalidate_tags(&tags(&["node:1", "node:1"])).await.unwrap();
        let checksum = ledger.checksum_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(checksum.invalidations, 1);
    }

    #[tokio::test]
    async fn test_delete_deduplicated_within_request() {
        let ledger = MemoryTagLedger::new();
        ledger.delete_tags(&tags(&["node:1"])).await.unwrap();
        ledger.delete_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(ledger.checksum_tags(&tags(&["node:1"])).await.unwrap().deletions, 1);

        ledger.invalidate_tags(&tags(&["node:1"])).await.unwrap();
        ledger.delete_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(ledger.checksum_tags(&tags(&["node:1"])).await.unwrap().deletions, 2);

        ledger.reset();
        ledger.delete_tags(&tags(&["node:1"])).await.unwrap();
        assert_eq!(ledger.checksum_tags(&tags(&["node:1"])).await.unwrap().deletions, 3);
    }

    #[tokio::test]
    async fn test_checksum_sums_across_tags() {
        let ledger = MemoryTagLedger::new();
        ledger.invalidate_tags(&tags(&["node:1", "node:2"])).await.unwrap();
        ledger.invalidate_tags(&tags(&["node:2"])).await.unwrap();
        ledger.delete_tags(&tags(&["user:1"])).await.unwrap();

        let checksum = ledger.checksum_tags(&tags(&["node:1", "node:2", "user:1"])).await.unwrap();
        assert_eq!(checksum, Checksum::new(3, 1));
    }

    #[tokio::test]
    async fn test_invalid_tag_rejected() {
        let ledger = MemoryTagLedger::new();
        let result = ledger.invalidate_tags(&tags(&["node 1"])).await;
        assert!(matches!(result, Err(Error::InvalidTag(_))));
    }
}
