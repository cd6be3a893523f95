//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SEARCHLENS_*)
//! 2. TOML config file (if SEARCHLENS_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SEARCHLENS_*)
/// 2. TOML config file (if SEARCHLENS_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bearer token for the upstream search-analytics API.
    ///
    /// Set via SEARCHLENS_API_KEY environment variable.
    /// Required only when a live fetch is issued.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the upstream search-analytics API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path to SQLite cache database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-call HTTP timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Upstream hard row cap per call.
    #[serde(default = "default_row_limit")]
    pub row_limit: u32,

    /// Fixed chunk width in days for wide date ranges.
    #[serde(default = "default_chunk_days")]
    pub chunk_days: u32,

    /// Durable-cache freshness window in hours.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,

    /// Session chunk-cache TTL in hours.
    #[serde(default = "default_chunk_cache_ttl_hours")]
    pub chunk_cache_ttl_hours: i64,

    /// Session chunk-cache capacity quota (entries).
    #[serde(default = "default_chunk_cache_max_entries")]
    pub chunk_cache_max_entries: usize,

    /// Maximum concurrent upstream calls for a wide range.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Maximum recursive split depth for a truncated chunk.
    #[serde(default = "default_max_split_depth")]
    pub max_split_depth: u32,

    /// Upstream data retention window in days, for the sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Default upstream API endpoint, shared with the client crate's defaults.
pub const DEFAULT_BASE_URL: &str = "https://analytics.example.com/v1";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./searchlens-cache.sqlite")
}

fn default_user_agent() -> String {
    "searchlens/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_row_limit() -> u32 {
    25_000
}

fn default_chunk_days() -> u32 {
    7
}

fn default_max_age_hours() -> i64 {
    168
}

fn default_chunk_cache_ttl_hours() -> i64 {
    24
}

fn default_chunk_cache_max_entries() -> usize {
    256
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_split_depth() -> u32 {
    5
}

fn default_retention_days() -> u32 {
    488 // ~16 months, the upstream's retention window
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            row_limit: default_row_limit(),
            chunk_days: default_chunk_days(),
            max_age_hours: default_max_age_hours(),
            chunk_cache_ttl_hours: default_chunk_cache_ttl_hours(),
            chunk_cache_max_entries: default_chunk_cache_max_entries(),
            max_concurrency: default_max_concurrency(),
            max_split_depth: default_max_split_depth(),
            retention_days: default_retention_days(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SEARCHLENS_`
    /// 2. TOML file from `SEARCHLENS_CONFIG_FILE` (if set)
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

        if let Ok(config_path) = std::env::var("SEARCHLENS_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SEARCHLENS_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Check if the upstream API key is available (for deferred validation).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the API key is not set.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "api_key".into(),
            hint: "Set SEARCHLENS_API_KEY environment variable".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./searchlens-cache.sqlite"));
        assert_eq!(config.user_agent, "searchlens/0.1");
        assert_eq!(config.row_limit, 25_000);
        assert_eq!(config.chunk_days, 7);
        assert_eq!(config.max_age_hours, 168);
        assert_eq!(config.chunk_cache_ttl_hours, 24);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_split_depth, 5);
        assert_eq!(config.retention_days, 488);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
    }

    #[test]
    fn test_require_api_key_missing() {
        let config = AppConfig::default();
        let result = config.require_api_key();
        assert!(matches!(result, Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_require_api_key_present() {
        let config = AppConfig { api_key: Some("test-key".into()), ..Default::default() };
        let result = config.require_api_key();
        assert_eq!(result.unwrap(), "test-key");
    }
}
