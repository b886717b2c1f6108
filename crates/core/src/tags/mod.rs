//! Tag invalidation ledger.
//!
//! Every tag owns two monotonic counters: invalidations and deletions. A
//! cache item remembers the sums of both counters over its tags at write
//! time (its [`Checksum`]). Recomputing the sums on read tells whether any
//! of its tags fired since:
//!
//! - deletion sum changed: the item is deleted and must not be returned.
//! - invalidation sum changed: the item is invalid, but callers that accept
//!   stale data may still use it.
//!
//! Counters are never decremented, so equal sums mean nothing fired.

pub mod database;
pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Error;

pub use database::DatabaseTagLedger;
pub use memory::MemoryTagLedger;

/// Sums of the invalidation and deletion counters over a set of tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Checksum {
    pub invalidations: u64,
    pub deletions: u64,
}

/// Outcome of comparing a stored checksum against the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagStatus {
    /// No tag was invalidated since the checksum was taken.
    pub valid: bool,
    /// A tag was deleted since the checksum was taken.
    pub deleted: bool,
}

impl Checksum {
    pub fn new(invalidations: u64, deletions: u64) -> Self {
        Self { invalidations, deletions }
    }

    /// Compare a checksum taken at write time (`self`) with the current one.
    pub fn status(&self, current: &Checksum) -> TagStatus {
        TagStatus { valid: self.invalidations == current.invalidations, deleted: self.deletions != current.deletions }
    }
}

impl std::ops::Add for Checksum {
    type Output = Checksum;

    fn add(self, rhs: Checksum) -> Checksum {
        Checksum {
            invalidations: self.invalidations + rhs.invalidations,
            deletions: self.deletions + rhs.deletions,
        }
    }
}

impl std::iter::Sum for Checksum {
    fn sum<I: Iterator<Item = Checksum>>(iter: I) -> Self {
        iter.fold(Checksum::default(), |acc, c| acc + c)
    }
}

/// Shared ledger of per-tag invalidation and deletion counters.
///
/// One ledger is shared by every backend that wants tag-based invalidation.
/// Implementations may keep per-request state (deletion de-duplication,
/// counter caches), which [`TagLedger::reset`] discards.
#[async_trait]
pub trait TagLedger: Send + Sync {
    /// Increment the invalidation counter of each distinct tag once.
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), Error>;

    /// Increment the deletion counter of each tag not already deleted in this request.
    async fn delete_tags(&self, tags: &[String]) -> Result<(), Error>;

    /// Sum both counters over `tags`. Unknown tags count as zero.
    async fn checksum_tags(&self, tags: &[String]) -> Result<Checksum, Error>;

    /// End-of-request hook.
    fn reset(&self);
}

/// Reject tags that cannot be stored in a space-separated tag column.
pub fn validate_tags(tags: &[String]) -> Result<(), Error> {
    for tag in tags {
        if tag.is_empty() || tag.chars().any(char::is_whitespace) {
            return Err(Error::InvalidTag(tag.clone()));
        }
    }
    Ok(())
}

/// Distinct tags in sorted order.
pub fn unique_tags(tags: &[String]) -> Vec<String> {
    tags.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Union of several tag lists, sorted and without duplicates.
pub fn merge_tags(lists: &[&[String]]) -> Vec<String> {
    lists
        .iter()
        .flat_map(|list| list.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Build `prefix:suffix` tags, e.g. `build_tags("node", &[1, 2])` gives `node:1`, `node:2`.
pub fn build_tags<S: std::fmt::Display>(prefix: &str, suffixes: &[S]) -> Vec<String> {
    suffixes.iter().map(|suffix| format!("{prefix}:{suffix}")).collect()
}
