//! cache_invalidate_tags and cache_delete_tags tool implementations.
//!
//! Both act on the shared tag ledger and therefore on every bin.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tagcache_core::{CacheFactory, Checksum, Error};

/// Parameters for the tag tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheTagsParams {
    /// Cache tags, e.g. `node:1` or `config:system.site`.
    pub tags: Vec<String>,
}

/// Output from the tag tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheTagsOutput {
    /// Checksum of the given tags after the operation.
    pub checksum: Checksum,
}

fn require_tags(params: &CacheTagsParams) -> Result<(), Error> {
    if params.tags.is_empty() {
        return Err(Error::InvalidInput("tags must not be empty".to_string()));
    }
    Ok(())
}

async fn respond(factory: &CacheFactory, tags: &[String]) -> Result<CallToolResult, McpError> {
    let checksum = factory.checksum_tags(tags).await?;
    let json = serde_json::to_string_pretty(&CacheTagsOutput { checksum }).map_err(Error::from)?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Implementation of the cache_invalidate_tags tool.
pub async fn invalidate_tags_impl(factory: &CacheFactory, params: CacheTagsParams) -> Result<CallToolResult, McpError> {
    require_tags(&params)?;
    factory.invalidate_tags(&params.tags).await?;
    respond(factory, &params.tags).await
}

/// Implementation of the cache_delete_tags tool.
pub async fn delete_tags_impl(factory: &CacheFactory, params: CacheTagsParams) -> Result<CallToolResult, McpError> {
    require_tags(&params)?;
    factory.delete_tags(&params.tags).await?;
    respond(factory, &params.tags).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{memory_factory, output_of};

    fn params(tags: &[&str]) -> CacheTagsParams {
        CacheTagsParams { tags: tags.iter().map(|t| t.to_string()).collect() }
    }

    #[tokio::test]
    async fn test_invalidate_tags_counts() {
        let factory = memory_factory();
        invalidate_tags_impl(&factory, params(&["node:1"])).await.unwrap();
        let result = invalidate_tags_impl(&factory, params(&["node:1", "node:2"])).await.unwrap();
        let output: CacheTagsOutput = output_of(&result);
        assert_eq!(output.checksum, Checksum::new(3, 0));
    }

    #[tokio::test]
    async fn test_delete_tags_deduplicated_within_request() {
        let factory = memory_factory();
        delete_tags_impl(&factory, params(&["node:1"])).await.unwrap();
        let result = delete_tags_impl(&factory, params(&["node:1"])).await.unwrap();
        let output: CacheTagsOutput = output_of(&result);
        assert_eq!(output.checksum, Checksum::new(0, 1));
    }

    #[tokio::test]
    async fn test_tags_rejects_bad_input() {
        let factory = memory_factory();
        assert!(invalidate_tags_impl(&factory, params(&[])).await.is_err());
        assert!(delete_tags_impl(&factory, params(&[""])).await.is_err());
    }
}
