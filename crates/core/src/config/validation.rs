//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::backend::validate_bin;
use crate::config::{AppConfig, BackendKind, LedgerKind};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `lock_timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - a key of `bins` is not a valid bin name
    ///
    /// Returns `ConfigError::Missing` if a database component is configured
    /// without a `db_path`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "lock_timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.lock_timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "lock_timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        for bin in self.bins.keys() {
            if let Err(e) = validate_bin(bin) {
                return Err(ConfigError::Invalid { field: format!("bins.{bin}"), reason: e.to_string() });
            }
        }

        if self.needs_database() && self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "db_path".into(),
                hint: "set TAGCACHE_DB_PATH or use memory backends".into(),
            });
        }

        let shared_bins = self.default_backend == BackendKind::Database
            || self.bins.values().any(|kind| *kind == BackendKind::Database);
        if shared_bins && self.tag_ledger == LedgerKind::Memory {
            tracing::warn!(
                "Database bins are configured with a memory tag ledger; \
                 invalidations will not reach other processes"
            );
        }

        Ok(())
    }
}
