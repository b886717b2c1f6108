//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (TAGCACHE_*)
//! 2. TOML config file (if TAGCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Storage used for a cache bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One SQLite table per bin.
    #[default]
    Database,
    /// Process-local map.
    Memory,
    /// Caching disabled.
    Null,
}

/// Where tag counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    #[default]
    Database,
    Memory,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (TAGCACHE_*)
/// 2. TOML config file (if TAGCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database.
    ///
    /// Set via TAGCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Backend for bins without an explicit entry in `bins`.
    ///
    /// Set via TAGCACHE_DEFAULT_BACKEND environment variable.
    #[serde(default)]
    pub default_backend: BackendKind,

    /// Per-bin backend overrides.
    ///
    /// Set via TAGCACHE_BINS__<BIN> environment variables.
    #[serde(default)]
    pub bins: HashMap<String, BackendKind>,

    /// Storage of the shared tag ledger.
    ///
    /// Set via TAGCACHE_TAG_LEDGER environment variable.
    #[serde(default)]
    pub tag_ledger: LedgerKind,

    /// Swallow store errors instead of failing requests.
    ///
    /// Set via TAGCACHE_TOLERATE_STORE_ERRORS environment variable.
    #[serde(default)]
    pub tolerate_store_errors: bool,

    /// Lifetime of collector write-back locks in milliseconds.
    ///
    /// Set via TAGCACHE_LOCK_TIMEOUT_MS environment variable.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./tagcache.sqlite")
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            default_backend: BackendKind::Database,
            bins: HashMap::new(),
            tag_ledger: LedgerKind::Database,
            tolerate_store_errors: false,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Lock timeout as Duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Backend configured for `bin`.
    pub fn backend_for(&self, bin: &str) -> BackendKind {
        self.bins.get(bin).copied().unwrap_or(self.default_backend)
    }

    /// Whether any configured component needs the SQLite database.
    pub fn needs_database(&self) -> bool {
        self.tag_ledger == LedgerKind::Database
            || self.default_backend == BackendKind::Database
            || self.bins.values().any(|kind| *kind == BackendKind::Database)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `TAGCACHE_`
    /// 2. TOML file from `TAGCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("TAGCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("TAGCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::extract(figment)
    }

    /// Load configuration from a TOML string layered over the defaults.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./tagcache.sqlite"));
        assert_eq!(config.default_backend, BackendKind::Database);
        assert_eq!(config.tag_ledger, LedgerKind::Database);
        assert!(config.bins.is_empty());
        assert!(!config.tolerate_store_errors);
        assert_eq!(config.lock_timeout_ms, 30_000);
    }

    #[test]
    fn test_lock_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_backend_for() {
        let config = AppConfig {
            bins: HashMap::from([("page".to_string(), BackendKind::Memory)]),
            ..Default::default()
        };
        assert_eq!(config.backend_for("page"), BackendKind::Memory);
        assert_eq!(config.backend_for("render"), BackendKind::Database);
    }

    #[test]
    fn test_needs_database() {
        assert!(AppConfig::default().needs_database());

        let memory_only = AppConfig {
            default_backend: BackendKind::Memory,
            tag_ledger: LedgerKind::Memory,
            ..Default::default()
        };
        assert!(!memory_only.needs_database());

        let mixed = AppConfig {
            bins: HashMap::from([("render".to_string(), BackendKind::Database)]),
            ..memory_only
        };
        assert!(mixed.needs_database());
    }

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml(
            r#"
            default_backend = "memory"
            tag_ledger = "memory"
            lock_timeout_ms = 500

            [bins]
            page = "null"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_backend, BackendKind::Memory);
        assert_eq!(config.backend_for("page"), BackendKind::Null);
        assert_eq!(config.lock_timeout_ms, 500);
        assert_eq!(config.db_path, PathBuf::from("./tagcache.sqlite"));
    }

    #[test]
    fn test_from_toml_unknown_backend() {
        let result = AppConfig::from_toml(r#"default_backend = "redis""#);
        assert!(matches!(result, Err(ConfigError::LoadFailed(_))));
    }
}
