//! cache_set tool implementation.
//!
//! Writes one item into a bin, stamped with its tags' current checksum.

use std::time::Duration;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tagcache_core::{CacheFactory, Error, Expiry};

/// Parameters for the cache_set tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheSetParams {
    /// The bin to write to.
    pub bin: String,

    /// Cache id of the item.
    pub cid: String,

    /// Payload to store.
    pub data: Value,

    /// Lifetime in seconds. Omit for a permanent item.
    pub ttl_secs: Option<u64>,

    /// Cache tags attached to the item.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Output from the cache_set tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheSetOutput {
    pub cid: String,
    pub expire: Expiry,
}

/// Implementation of the cache_set tool.
pub async fn set_impl(factory: &CacheFactory, params: CacheSetParams) -> Result<CallToolResult, McpError> {
    if params.cid.is_empty() {
        return Err(Error::InvalidInput("cid must not be empty".to_string()).into());
    }

    let expire = match params.ttl_secs {
        Some(0) => return Err(Error::InvalidInput("ttl_secs must be greater than 0".to_string()).into()),
        Some(secs) => Expiry::after(Duration::from_secs(secs)),
        None => Expiry::Permanent,
    };

    factory
        .bin(&params.bin)?
        .set(&params.cid, params.data, expire, &params.tags)
        .await?;

    let output = CacheSetOutput { cid: params.cid, expire };
    let json = serde_json::to_string_pretty(&output).map_err(Error::from)?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
