//! Cache bins and the backend contract.
//!
//! A bin is a named partition of the cache. Every bin is served by a
//! [`CacheBackend`]; stateful backends share one [`TagLedger`](crate::tags::TagLedger)
//! and compare each item's stored checksum against the current one on read.

pub mod database;
pub mod memory;
pub mod null;
pub mod tolerant;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::Error;
use crate::tags::Checksum;

pub use database::DatabaseBackend;
pub use memory::MemoryBackend;
pub use null::NullBackend;
pub use tolerant::TolerantBackend;

/// Stored `expire` value of a permanent item.
pub(crate) const PERMANENT_MILLIS: i64 = -1;

/// When a cache item stops being valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    /// Valid until deleted or invalidated through its tags.
    #[default]
    Permanent,
    /// Valid up to and including this instant.
    At(DateTime<Utc>),
}

impl Expiry {
    /// Expire `ttl` from now.
    pub fn after(ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Expiry::At(Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::Permanent => false,
            Expiry::At(at) => *at < now,
        }
    }

    /// The earlier of two expiries; `Permanent` never wins over a deadline.
    pub fn earliest(self, other: Expiry) -> Expiry {
        match (self, other) {
            (Expiry::Permanent, other) => other,
            (this, Expiry::Permanent) => this,
            (Expiry::At(a), Expiry::At(b)) => Expiry::At(a.min(b)),
        }
    }

    /// Storage form: unix milliseconds, [`PERMANENT_MILLIS`] for permanent.
    pub(crate) fn to_millis(self) -> i64 {
        match self {
            Expiry::Permanent => PERMANENT_MILLIS,
            Expiry::At(at) => at.timestamp_millis(),
        }
    }

    pub(crate) fn from_millis(millis: i64) -> Self {
        if millis == PERMANENT_MILLIS {
            return Expiry::Permanent;
        }
        DateTime::from_timestamp_millis(millis).map_or(Expiry::Permanent, Expiry::At)
    }
}

/// A cache item as returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheItem {
    pub cid: String,
    pub data: Value,
    /// Write time, microsecond precision.
    pub created: DateTime<Utc>,
    pub expire: Expiry,
    pub tags: Vec<String>,
    /// Tag checksum captured when the item was written.
    pub checksum: Checksum,
    /// False if the item expired or one of its tags was invalidated.
    pub valid: bool,
}

impl CacheItem {
    /// Deserialize the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(self.data.clone()).map_err(Error::from)
    }
}

/// One write for [`CacheBackend::set_multiple`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub cid: String,
    pub data: Value,
    pub expire: Expiry,
    pub tags: Vec<String>,
}

impl CacheEntry {
    pub fn new(cid: impl Into<String>, data: Value) -> Self {
        Self { cid: cid.into(), data, expire: Expiry::Permanent, tags: Vec::new() }
    }

    pub fn expire(mut self, expire: Expiry) -> Self {
        self.expire = expire;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Pluggable storage for one cache bin.
///
/// Every operation is fallible because the store may be remote or missing;
/// [`TolerantBackend`] turns those failures into misses and no-ops.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch one item. Invalid items are returned only if `allow_invalid` is set.
    async fn get(&self, cid: &str, allow_invalid: bool) -> Result<Option<CacheItem>, Error> {
        let mut cids = vec![cid.to_string()];
        let mut items = self.get_multiple(&mut cids, allow_invalid).await?;
        Ok(items.remove(cid))
    }

    /// Fetch several items. Hits are removed from `cids`, which is left holding the misses.
    async fn get_multiple(
        &self, cids: &mut Vec<String>, allow_invalid: bool,
    ) -> Result<HashMap<String, CacheItem>, Error>;

    async fn set(&self, cid: &str, data: Value, expire: Expiry, tags: &[String]) -> Result<(), Error> {
        self.set_multiple(vec![CacheEntry { cid: cid.to_string(), data, expire, tags: tags.to_vec() }])
            .await
    }

    async fn set_multiple(&self, entries: Vec<CacheEntry>) -> Result<(), Error>;

    async fn delete(&self, cid: &str) -> Result<(), Error> {
        self.delete_multiple(&[cid.to_string()]).await
    }

    async fn delete_multiple(&self, cids: &[String]) -> Result<(), Error>;

    /// Remove every item in the bin.
    async fn flush(&self) -> Result<(), Error>;

    /// Mark an item invalid without removing it.
    async fn invalidate(&self, cid: &str) -> Result<(), Error> {
        self.invalidate_multiple(&[cid.to_string()]).await
    }

    async fn invalidate_multiple(&self, cids: &[String]) -> Result<(), Error>;

    async fn invalidate_all(&self) -> Result<(), Error>;

    /// Remove time-expired items only. Returns the number removed.
    async fn expire(&self) -> Result<u64, Error>;

    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), Error>;

    async fn delete_tags(&self, tags: &[String]) -> Result<(), Error>;

    /// Remove expired items and items whose tags were deleted. Returns the number removed.
    async fn garbage_collection(&self) -> Result<u64, Error>;

    async fn is_empty(&self) -> Result<bool, Error>;

    /// Drop the bin's storage altogether.
    async fn remove_bin(&self) -> Result<(), Error>;
}

/// Bin names become table suffixes, so only `[a-z0-9_]` is accepted.
pub fn validate_bin(bin: &str) -> Result<(), Error> {
    if bin.is_empty() || !bin.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(Error::InvalidBin(bin.to_string()));
    }
    Ok(())
}

/// Current time truncated to the precision items are stored with.
pub(crate) fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Apply the read rules to a stored item given the current tag checksum.
///
/// Deleted items are dropped. Expired or tag-invalidated items are marked
/// invalid and only kept when `allow_invalid` is set.
pub(crate) fn prepare_item(
    mut item: CacheItem, current: &Checksum, now: DateTime<Utc>, allow_invalid: bool,
) -> Option<CacheItem> {
    let status = item.checksum.status(current);
    if status.deleted {
        return None;
    }
    item.valid = status.valid && !item.expire.is_expired(now);
    if !allow_invalid && !item.valid {
        return None;
    }
    Some(item)
}
