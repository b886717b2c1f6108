//! MCP tool implementations.
//!
//! This module contains all tools exposed by the tagcache server.

pub mod cache;

#[cfg(test)]
pub(crate) mod test_support {
    use rmcp::model::CallToolResult;
    use serde::de::DeserializeOwned;
    use tagcache_core::config::{BackendKind, LedgerKind};
    use tagcache_core::{AppConfig, CacheFactory};

    pub fn memory_factory() -> CacheFactory {
        let config =
            AppConfig { default_backend: BackendKind::Memory, tag_ledger: LedgerKind::Memory, ..Default::default() };
        CacheFactory::new(config, None).unwrap()
    }

    pub fn output_of<T: DeserializeOwned>(result: &CallToolResult) -> T {
        let content_val = serde_json::to_value(&result.content[0]).unwrap();
        let text = content_val
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }
}
