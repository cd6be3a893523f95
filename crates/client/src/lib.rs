//! Client code for searchlens.
//!
//! This crate provides the upstream search-analytics API client, the
//! adaptive chunked fetcher with its session chunk cache, and the
//! read-through query service shared by the CLI and embedders.

pub mod api;
pub mod fetch;
pub mod service;

pub use api::{AnalyticsApi, ApiConfig, ApiError, ApiRow, QueryRequest, SearchAnalyticsClient};
pub use fetch::{AdaptiveFetcher, ChunkCache, DateChunk, FetchConfig, FetchOutcome, tile_range};
pub use service::{AnalyticsService, QueryOutcome, QuerySpec, RowSource};
