//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
//! Every tool call is one request: per-request tag state is reset
//! once the tool returns.
use crate::tools::cache::{
    CacheChecksumParams, CacheDeleteParams, CacheGetParams, CachePurgeParams, CacheSetParams, CacheTagsParams,
    checksum_impl, delete_impl, delete_tags_impl, get_impl, invalidate_tags_impl, purge_impl, set_impl,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use tagcache_core::CacheFactory;

/// The main MCP server handler for tagcache.
#[derive(Clone)]
pub struct TagCacheServer {
    factory: CacheFactory,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl TagCacheServer {
    /// Create a new server handler over the given bins.
    pub fn new(factory: CacheFactory) -> Self {
        Self { factory, tool_router: Self::tool_router() }
    }

    #[tool(description = "Read items from a cache bin. Returns hits keyed by cid plus the list of misses.")]
    async fn cache_get(&self, params: Parameters<CacheGetParams>) -> Result<CallToolResult, McpError> {
        get_impl(&self.factory, params.0).await
    }

    #[tool(description = "Write an item into a cache bin with optional TTL and cache tags.")]
    async fn cache_set(&self, params: Parameters<CacheSetParams>) -> Result<CallToolResult, McpError> {
        set_impl(&self.factory, params.0).await
    }

    #[tool(description = "Delete or invalidate items in a cache bin by cid, or the whole bin.")]
    async fn cache_delete(&self, params: Parameters<CacheDeleteParams>) -> Result<CallToolResult, McpError> {
        delete_impl(&self.factory, params.0).await
    }

    /// Soft invalidation: tagged items stay readable with `allow_invalid`.
    #[tool(description = "Invalidate cache tags in every bin. Tagged items become invalid but stay readable on request.")]
    async fn cache_invalidate_tags(&self, params: Parameters<CacheTagsParams>) -> Result<CallToolResult, McpError> {
        invalidate_tags_impl(&self.factory, params.0).await
    }

    #[tool(description = "Delete cache tags in every bin. Tagged items can no longer be read.")]
    async fn cache_delete_tags(&self, params: Parameters<CacheTagsParams>) -> Result<CallToolResult, McpError> {
        delete_tags_impl(&self.factory, params.0).await
    }

    #[tool(description = "Current checksum of a set of cache tags, optionally compared against an earlier one.")]
    async fn cache_checksum(&self, params: Parameters<CacheChecksumParams>) -> Result<CallToolResult, McpError> {
        checksum_impl(&self.factory, params.0).await
    }

    #[tool(description = "Garbage-collect expired and tag-deleted items, or remove a bin's storage.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        purge_impl(&self.factory, params.0).await
    }
}

impl ServerHandler for TagCacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "tagcache".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        let result = self
            .tool_router
            .call(ToolCallContext::new(self, request, context))
            .await;

        self.factory.end_request();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::memory_factory;

    #[test]
    fn test_lists_all_tools() {
        let server = TagCacheServer::new(memory_factory());
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "cache_checksum",
                "cache_delete",
                "cache_delete_tags",
                "cache_get",
                "cache_invalidate_tags",
                "cache_purge",
                "cache_set",
            ]
        );
    }
}
