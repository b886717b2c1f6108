//! cache_delete tool implementation.
//!
//! Deletes or invalidates items by cid, or the whole bin.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tagcache_core::{CacheFactory, Error};

/// Parameters for the cache_delete tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheDeleteParams {
    /// The bin to operate on.
    pub bin: String,

    /// Cache ids to remove. Ignored when `all` is set.
    #[serde(default)]
    pub cids: Vec<String>,

    /// Mark items invalid instead of removing them.
    #[serde(default)]
    pub invalidate: bool,

    /// Apply to every item in the bin.
    #[serde(default)]
    pub all: bool,
}

/// Output from the cache_delete tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheDeleteOutput {
    /// Either "deleted" or "invalidated".
    pub action: String,

    /// Number of cids the action was applied to, or null for the whole bin.
    pub count: Option<usize>,
}

/// Implementation of the cache_delete tool.
pub async fn delete_impl(factory: &CacheFactory, params: CacheDeleteParams) -> Result<CallToolResult, McpError> {
    if !params.all && params.cids.is_empty() {
        return Err(Error::InvalidInput("Either cids or all must be specified".to_string()).into());
    }

    let backend = factory.bin(&params.bin)?;
    let count = match (params.all, params.invalidate) {
        (true, true) => {
            backend.invalidate_all().await?;
            None
        }
        (true, false) => {
            backend.flush().await?;
            None
        }
        (false, true) => {
            backend.invalidate_multiple(&params.cids).await?;
            Some(params.cids.len())
        }
        (false, false) => {
            backend.delete_multiple(&params.cids).await?;
            Some(params.cids.len())
        }
    };

    let action = if params.invalidate { "invalidated" } else { "deleted" };
    let output = CacheDeleteOutput { action: action.to_string(), count };
    let json = serde_json::to_string_pretty(&output).map_err(Error::from)?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
