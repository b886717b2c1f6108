//! cache_purge tool implementation.
//!
//! Garbage-collects expired and tag-deleted items, or drops a bin entirely.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tagcache_core::{CacheFactory, Error};

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Restrict to this bin. Omit to collect every bin used so far.
    pub bin: Option<String>,

    /// Drop the bin's storage instead of collecting garbage. Requires `bin`.
    #[serde(default)]
    pub remove_bin: bool,
}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    /// Number of items removed by garbage collection.
    pub deleted: u64,

    /// Whether the bin is now empty (only reported for a single bin).
    pub empty: Option<bool>,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(factory: &CacheFactory, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    let output = match (params.bin, params.remove_bin) {
        (None, true) => {
            return Err(Error::InvalidInput("remove_bin requires a bin".to_string()).into());
        }
        (None, false) => CachePurgeOutput { deleted: factory.garbage_collection().await?, empty: None },
        (Some(bin), true) => {
            factory.bin(&bin)?.remove_bin().await?;
            tracing::info!(bin, "bin removed");
            CachePurgeOutput { deleted: 0, empty: Some(true) }
        }
        (Some(bin), false) => {
            let backend = factory.bin(&bin)?;
            let deleted = backend.garbage_collection().await?;
            CachePurgeOutput { deleted, empty: Some(backend.is_empty().await?) }
        }
    };

    let json = serde_json::to_string_pretty(&output).map_err(Error::from)?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{memory_factory, output_of};
    use serde_json::json;
    use tagcache_core::Expiry;

    async fn seeded() -> CacheFactory {
        let factory = memory_factory();
        let tagged = vec!["node:1".to_string()];
        let render = factory.bin("render").unwrap();
        render.set("a", json!(1), Expiry::Permanent, &tagged).await.unwrap();
        render.set("b", json!(2), Expiry::Permanent, &[]).await.unwrap();
        let page = factory.bin("page").unwrap();
        page.set("a", json!(3), Expiry::Permanent, &tagged).await.unwrap();
        factory.delete_tags(&tagged).await.unwrap();
        factory
    }

    #[tokio::test]
    async fn test_purge_single_bin() {
        let factory = seeded().await;
        let params = CachePurgeParams { bin: Some("render".to_string()), remove_bin: false };

        let output: CachePurgeOutput = output_of(&purge_impl(&factory, params).await.unwrap());
        assert_eq!(output.deleted, 1);
        assert_eq!(output.empty, Some(false));
    }

    #[tokio::test]
    async fn test_purge_all_bins() {
        let factory = seeded().await;
        let params = CachePurgeParams { bin: None, remove_bin: false };

        let output: CachePurgeOutput = output_of(&purge_impl(&factory, params).await.unwrap());
        assert_eq!(output.deleted, 2);
        assert_eq!(output.empty, None);
    }

    #[tokio::test]
    async fn test_remove_bin() {
        let factory = seeded().await;
        let params = CachePurgeParams { bin: Some("render".to_string()), remove_bin: true };
        purge_impl(&factory, params).await.unwrap();
        assert!(factory.bin("render").unwrap().get("b", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_bin_requires_bin() {
        let factory = seeded().await;
        let params = CachePurgeParams { bin: None, remove_bin: true };
        assert!(purge_impl(&factory, params).await.is_err());
    }
}
