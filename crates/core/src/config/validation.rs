//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
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
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `row_limit` is 0 or exceeds the upstream cap of 25,000
    /// - `chunk_days` is outside 1-31
    /// - `max_concurrency` is outside 1-16
    /// - `max_age_hours` or `chunk_cache_ttl_hours` is not positive
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.row_limit == 0 {
            return Err(ConfigError::Invalid { field: "row_limit".into(), reason: "must be greater than 0".into() });
        }
        if self.row_limit > 25_000 {
            return Err(ConfigError::Invalid {
                field: "row_limit".into(),
                reason: "must not exceed the upstream cap of 25000".into(),
            });
        }

        if self.chunk_days == 0 || self.chunk_days > 31 {
            return Err(ConfigError::Invalid { field: "chunk_days".into(), reason: "must be 1-31".into() });
        }

        if self.max_concurrency == 0 || self.max_concurrency > 16 {
            return Err(ConfigError::Invalid { field: "max_concurrency".into(), reason: "must be 1-16".into() });
        }

        if self.max_age_hours <= 0 {
            return Err(ConfigError::Invalid { field: "max_age_hours".into(), reason: "must be positive".into() });
        }
        if self.chunk_cache_ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_cache_ttl_hours".into(),
                reason: "must be positive".into(),
            });
        }

        if self.chunk_cache_max_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_cache_max_entries".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.max_split_depth > 10 {
            tracing::warn!(
                max_split_depth = self.max_split_depth,
                "unusually deep split bound; a chunk over the row cap fans out exponentially"
            );
        }

        Ok(())
    }
}
