//! Upstream search-analytics API client.
//!
//! Provides a client for the row-capped search-analytics API with rate
//! limiting, request validation, and response normalization.
//!
//! ### Specification
//!
//! - **Endpoint**: `POST {base}/sites/{site}/searchanalytics/query`
//! - **Authentication**: Bearer token via the `Authorization` header.
//! - **Row cap**: at most `row_limit` rows per call (hard cap 25,000); the
//!   upstream never signals truncation, so callers infer it by comparing
//!   the returned row count against the limit.
//! - **Rate limiting**: minimum interval between calls (token-bucket-lite).

pub mod error;
pub mod request;
pub mod response;

pub use error::ApiError;
pub use request::{MAX_ROW_LIMIT, QueryRequest};
pub use response::{ApiResponse, ApiRow, normalize_rows};

use async_trait::async_trait;
use reqwest::header;
use searchlens_core::config::DEFAULT_BASE_URL;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "searchlens/0.1";

/// Minimum interval between requests for rate limiting.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(200);

/// The one upstream operation the engine depends on.
///
/// Kept as a trait seam so the chunked fetcher can run against mock
/// upstreams in tests.
#[async_trait]
pub trait AnalyticsApi: Send + Sync {
    /// Execute one query; returns at most `req.row_limit` rows.
    async fn query(&self, req: &QueryRequest) -> Result<Vec<ApiRow>, ApiError>;
}

/// Analytics API client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bearer token from SEARCHLENS_API_KEY env var.
    pub api_key: String,
    /// Base URL (default: https://analytics.example.com/v1).
    pub base_url: String,
    /// Request timeout (default: 20s).
    pub timeout: Duration,
    /// User-agent string (default: searchlens/0.x).
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ApiConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads SEARCHLENS_API_KEY from environment. Returns error if not set.
    pub fn from_env() -> Result<Self, ApiError> {
        let api_key = std::env::var("SEARCHLENS_API_KEY").map_err(|_| ApiError::MissingApiKey)?;

        Ok(Self { api_key, ..Default::default() })
    }
}

/// Rate limiter to enforce request intervals.
#[derive(Debug)]
struct RateLimiter {
    last_request: Mutex<Instant>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(Instant::now().checked_sub(min_interval).unwrap_or_else(Instant::now)),
            min_interval,
        }
    }

    /// Acquire permission to make a request, waiting if necessary.
    async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

/// HTTP client for the search-analytics API.
#[derive(Debug, Clone)]
pub struct SearchAnalyticsClient {
    http: reqwest::Client,
    config: ApiConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl SearchAnalyticsClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        if config.api_key.is_empty() {
            return Err(ApiError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Network(Arc::new(e)))?;

        Ok(Self { http, config, rate_limiter: Arc::new(RateLimiter::new(MIN_REQUEST_INTERVAL)) })
    }

    /// Create a new client from environment variables.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(ApiConfig::from_env()?)
    }

    fn query_url(&self, site: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(site.as_bytes()).collect();
        format!("{}/sites/{}/searchanalytics/query", self.config.base_url, encoded)
    }
}

#[async_trait]
impl AnalyticsApi for SearchAnalyticsClient {
    /// Execute one analytics query.
    ///
    /// This method handles rate limiting, request validation, status
    /// mapping, and deserialization of the raw row list.
    async fn query(&self, req: &QueryRequest) -> Result<Vec<ApiRow>, ApiError> {
        req.validate()?;

        self.rate_limiter.acquire().await;

        let start = Instant::now();
        let url = self.query_url(&req.site);

        tracing::debug!(site = %req.site, start = %req.start_date, end = %req.end_date, "querying upstream analytics");

        let http_response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, &self.config.user_agent)
            .json(req)
            .send()
            .await
            .map_err(ApiError::from)?;

        let status = http_response.status();
        tracing::debug!("upstream response status: {}", status);

        if status == 401 || status == 403 {
            return Err(ApiError::AuthError);
        }

        if status == 429 {
            return Err(ApiError::RateLimited);
        }

        if status.is_client_error() || status.is_server_error() {
            return Err(ApiError::HttpError { status: status.as_u16() });
        }

        let bytes = http_response.bytes().await.map_err(ApiError::from)?;
        let api_response: ApiResponse =
            serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))?;

        tracing::debug!(
            "query completed in {:?}, {} rows (limit {})",
            start.elapsed(),
            api_response.rows.len(),
            req.row_limit
        );

        Ok(api_response.rows)
    }
}
