//! cache_get tool implementation.
//!
//! Reads one or more items from a bin.

use std::collections::HashMap;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tagcache_core::{CacheFactory, CacheItem, Error};

/// Parameters for the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetParams {
    /// The bin to read from.
    pub bin: String,

    /// Cache ids to look up.
    pub cids: Vec<String>,

    /// Also return items that expired or whose tags were invalidated.
    #[serde(default)]
    pub allow_invalid: bool,
}

/// Output from the cache_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGetOutput {
    /// Items found, keyed by cid.
    pub items: HashMap<String, CacheItem>,

    /// Requested cids with no usable item.
    pub misses: Vec<String>,
}

/// Implementation of the cache_get tool.
pub async fn get_impl(factory: &CacheFactory, params: CacheGetParams) -> Result<CallToolResult, McpError> {
    if params.cids.is_empty() {
        return Err(Error::InvalidInput("cids must not be empty".to_string()).into());
    }

    let backend = factory.bin(&params.bin)?;
    let mut misses = params.cids;
    let items = backend.get_multiple(&mut misses, params.allow_invalid).await?;
    tracing::debug!(bin = %params.bin, hits = items.len(), misses = misses.len(), "cache_get");

    let output = CacheGetOutput { items, misses };
    let json = serde_json::to_string_pretty(&output).map_err(Error::from)?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
