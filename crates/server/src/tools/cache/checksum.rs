//! cache_checksum tool implementation.
//!
//! Reports the current checksum of a tag set and, given a checksum captured
//! earlier, whether items stamped with it are still valid or deleted.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tagcache_core::{CacheFactory, Checksum, Error};

/// Parameters for the cache_checksum tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheChecksumParams {
    /// Cache tags to sum over. An empty list has checksum (0, 0).
    #[serde(default)]
    pub tags: Vec<String>,

    /// A checksum captured earlier to compare against.
    pub since: Option<Checksum>,
}

/// Output from the cache_checksum tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheChecksumOutput {
    pub checksum: Checksum,

    /// No tag was invalidated since `since`.
    pub valid: Option<bool>,

    /// A tag was deleted since `since`.
    pub deleted: Option<bool>,
}

/// Implementation of the cache_checksum tool.
pub async fn checksum_impl(factory: &CacheFactory, params: CacheChecksumParams) -> Result<CallToolResult, McpError> {
    let checksum = factory.checksum_tags(&params.tags).await?;
    let status = params.since.map(|since| since.status(&checksum));

    let output = CacheChecksumOutput {
        checksum,
        valid: status.map(|s| s.valid),
        deleted: status.map(|s| s.deleted),
    };
    let json = serde_json::to_string_pretty(&output).map_err(Error::from)?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
