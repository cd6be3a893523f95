//! Adaptive chunked fetching.
//!
//! Splits a wide date range into fixed-size chunks, fetches them
//! concurrently under a bounded worker pool, and recursively subdivides any
//! chunk whose row count hits the upstream cap (the upstream never signals
//! truncation). Chunk results merge in chunk order, never completion order.
//! Failures degrade per chunk: a failed or timed-out call contributes an
//! empty result and a `failed_chunks` entry without disturbing siblings.

pub mod cache;
pub mod chunks;

pub use cache::{ChunkCache, chunk_key};
pub use chunks::{DateChunk, tile_range};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use searchlens_core::{AppConfig, DataPoint, Dimension};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::api::{AnalyticsApi, QueryRequest, normalize_rows};

/// Fetcher tuning knobs, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Upstream hard row cap per call; hitting it means truncation.
    pub row_limit: u32,
    /// Fixed chunk width for tiling wide ranges.
    pub chunk_days: u32,
    /// Maximum recursive split depth before a branch is abandoned.
    pub max_split_depth: u32,
    /// Bound on simultaneously in-flight chunk fetches.
    pub max_concurrency: usize,
    /// Deadline for each upstream call.
    pub call_timeout: Duration,
    /// Session chunk-cache TTL.
    pub cache_ttl_hours: i64,
    /// Session chunk-cache capacity quota.
    pub cache_max_entries: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            row_limit: 25_000,
            chunk_days: 7,
            max_split_depth: 5,
            max_concurrency: 4,
            call_timeout: Duration::from_secs(20),
            cache_ttl_hours: 24,
            cache_max_entries: 256,
        }
    }
}

impl FetchConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            row_limit: config.row_limit,
            chunk_days: config.chunk_days,
            max_split_depth: config.max_split_depth,
            max_concurrency: config.max_concurrency,
            call_timeout: config.timeout(),
            cache_ttl_hours: config.chunk_cache_ttl_hours,
            cache_max_entries: config.chunk_cache_max_entries,
        }
    }
}

/// Merged result of a chunked fetch, with typed completeness gaps.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Rows concatenated in chunk order.
    pub rows: Vec<DataPoint>,
    /// Days whose single-day result still hit the row cap: knowingly
    /// incomplete, with no finer granularity left to split into.
    pub incomplete_days: Vec<NaiveDate>,
    /// Chunks that contributed nothing (upstream failure, timeout, or
    /// split-depth exhaustion).
    pub failed_chunks: Vec<DateChunk>,
}

impl FetchOutcome {
    /// True when every chunk completed and no day hit the cap.
    pub fn is_complete(&self) -> bool {
        self.incomplete_days.is_empty() && self.failed_chunks.is_empty()
    }
}

/// Per-chunk accumulation, merged into a [`FetchOutcome`] in chunk order.
#[derive(Debug, Default)]
struct ChunkFetch {
    rows: Vec<DataPoint>,
    incomplete_days: Vec<NaiveDate>,
    failed: Vec<DateChunk>,
}

impl ChunkFetch {
    fn failed(chunk: DateChunk) -> Self {
        Self { failed: vec![chunk], ..Self::default() }
    }

    fn is_clean(&self) -> bool {
        self.incomplete_days.is_empty() && self.failed.is_empty()
    }
}

/// Adaptive chunked fetcher over any [`AnalyticsApi`] implementation.
#[derive(Debug)]
pub struct AdaptiveFetcher<A> {
    api: Arc<A>,
    config: FetchConfig,
    cache: Arc<ChunkCache>,
}

impl<A> Clone for AdaptiveFetcher<A> {
    fn clone(&self) -> Self {
        Self { api: Arc::clone(&self.api), config: self.config.clone(), cache: Arc::clone(&self.cache) }
    }
}

impl<A: AnalyticsApi + 'static> AdaptiveFetcher<A> {
    pub fn new(api: A, config: FetchConfig) -> Self {
        let cache = Arc::new(ChunkCache::new(config.cache_ttl_hours, config.cache_max_entries));
        Self { api: Arc::new(api), config, cache }
    }

    /// Fetch all rows for a site over an inclusive date range.
    ///
    /// A range at most one chunk wide is fetched directly; wider ranges are
    /// tiled into fixed chunks fetched concurrently (bounded by
    /// `max_concurrency`), each independently cache-checked and recursively
    /// subdivided on truncation. Results concatenate in chunk input order.
    pub async fn fetch(
        &self, site: &str, start: NaiveDate, end: NaiveDate, dimensions: &[Dimension],
    ) -> FetchOutcome {
        let chunks = tile_range(start, end, self.config.chunk_days);

        let mut outcome = FetchOutcome::default();
        match chunks.len() {
            0 => return outcome,
            1 => {
                let fetch = self.fetch_chunk(site, chunks[0], dimensions).await;
                merge(&mut outcome, fetch);
                return outcome;
            }
            _ => {}
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut join_set = JoinSet::new();

        for (index, chunk) in chunks.iter().copied().enumerate() {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let fetcher = self.clone();
            let site = site.to_string();
            let dimensions = dimensions.to_vec();

            join_set.spawn(async move {
                // NOTE: Hold permit for task duration to enforce concurrency limit
                let _permit = permit;
                (index, fetcher.fetch_chunk(&site, chunk, &dimensions).await)
            });
        }

        let mut slots: Vec<Option<ChunkFetch>> = (0..chunks.len()).map(|_| None).collect();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((index, fetch)) => slots[index] = Some(fetch),
                Err(e) => tracing::error!(error = %e, "chunk fetch task panicked"),
            }
        }

        // Merge in chunk order regardless of completion order; a slot left
        // empty by a task failure counts as a failed chunk.
        for (chunk, slot) in chunks.into_iter().zip(slots) {
            match slot {
                Some(fetch) => merge(&mut outcome, fetch),
                None => outcome.failed_chunks.push(chunk),
            }
        }
        outcome
    }

    /// Invalidate the session-cache entries tiling an outer range.
    pub fn invalidate(&self, site: &str, start: NaiveDate, end: NaiveDate) -> usize {
        self.cache.invalidate_range(site, start, end, self.config.chunk_days)
    }

    /// The session chunk cache, for diagnostics.
    pub fn chunk_cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Fetch one chunk, consulting the session cache first.
    ///
    /// Only a clean result (no failures, no capped days) is cached.
    async fn fetch_chunk(&self, site: &str, chunk: DateChunk, dimensions: &[Dimension]) -> ChunkFetch {
        if let Some(rows) = self.cache.get(site, chunk.start, chunk.end) {
            tracing::debug!(%chunk, "session cache hit");
            return ChunkFetch { rows, ..ChunkFetch::default() };
        }

        let fetch = self.fetch_recursive(site, chunk, dimensions, 0).await;
        if fetch.is_clean() {
            self.cache.set(site, chunk.start, chunk.end, fetch.rows.clone());
        }
        fetch
    }

    /// Recursive quota-avoidance fetch for one chunk.
    ///
    /// A full-cap result for a multi-day chunk splits at the floor-midpoint
    /// day; the halves run concurrently and concatenate in (first, second)
    /// order. A full-cap single day is accepted as knowingly incomplete.
    fn fetch_recursive<'a>(
        &'a self, site: &'a str, chunk: DateChunk, dimensions: &'a [Dimension], depth: u32,
    ) -> Pin<Box<dyn Future<Output = ChunkFetch> + Send + 'a>> {
        Box::pin(async move {
            if depth > self.config.max_split_depth {
                tracing::error!(%chunk, depth, "split depth exceeded, abandoning branch");
                return ChunkFetch::failed(chunk);
            }

            let req = QueryRequest {
                site: site.to_string(),
                start_date: chunk.start,
                end_date: chunk.end,
                dimensions: dimensions.to_vec(),
                row_limit: self.config.row_limit,
            };

            let raw = match tokio::time::timeout(self.config.call_timeout, self.api.query(&req)).await {
                Ok(Ok(rows)) => rows,
                Ok(Err(e)) => {
                    tracing::warn!(%chunk, error = %e, "upstream call failed, chunk contributes nothing");
                    return ChunkFetch::failed(chunk);
                }
                Err(_) => {
                    tracing::warn!(%chunk, "upstream call timed out, chunk contributes nothing");
                    return ChunkFetch::failed(chunk);
                }
            };

            let truncated = raw.len() >= self.config.row_limit as usize;

            if truncated && let Some((first, second)) = chunk.split_midpoint() {
                tracing::debug!(%chunk, rows = raw.len(), "row cap hit, splitting at midpoint");
                let (a, b) = tokio::join!(
                    self.fetch_recursive(site, first, dimensions, depth + 1),
                    self.fetch_recursive(site, second, dimensions, depth + 1),
                );
                let mut fetch = a;
                merge_chunk(&mut fetch, b);
                return fetch;
            }

            let rows = match normalize_rows(site, dimensions, raw, chunk.start) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(%chunk, error = %e, "failed to normalize upstream rows");
                    return ChunkFetch::failed(chunk);
                }
            };

            if truncated {
                // Single day at the cap: no sub-day granularity exists.
                tracing::warn!(day = %chunk.start, "single-day result hit the row cap, accepting incomplete data");
                return ChunkFetch { rows, incomplete_days: vec![chunk.start], failed: Vec::new() };
            }

            ChunkFetch { rows, ..ChunkFetch::default() }
        })
    }
}

fn merge(outcome: &mut FetchOutcome, fetch: ChunkFetch) {
    outcome.rows.extend(fetch.rows);
    outcome.incomplete_days.extend(fetch.incomplete_days);
    outcome.failed_chunks.extend(fetch.failed);
}

fn merge_chunk(into: &mut ChunkFetch, other: ChunkFetch) {
    into.rows.extend(other.rows);
    into.incomplete_days.extend(other.incomplete_days);
    into.failed.extend(other.failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ApiRow};
    use async_trait::async_trait;
    use chrono::{Datelike, Duration as ChronoDuration};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SITE: &str = "https://example.com";

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn dims() -> Vec<Dimension> {
        vec![Dimension::Date, Dimension::Query]
    }

    fn day_row(date: NaiveDate, query: &str) -> ApiRow {
        ApiRow {
            keys: vec![date.to_string(), query.to_string()],
            clicks: 1,
            impressions: 10,
            ctr: 0.1,
            position: 1.0,
        }
    }

    fn config(row_limit: u32) -> FetchConfig {
        FetchConfig { row_limit, ..FetchConfig::default() }
    }

    /// One row per day, never truncating. Counts upstream calls.
    struct PerDayApi {
        calls: AtomicUsize,
    }

    impl PerDayApi {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl AnalyticsApi for PerDayApi {
        async fn query(&self, req: &QueryRequest) -> Result<Vec<ApiRow>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = Vec::new();
            let mut day = req.start_date;
            while day <= req.end_date {
                rows.push(day_row(day, "q"));
                day += ChronoDuration::days(1);
            }
            Ok(rows)
        }
    }

    /// Always at the cap for multi-day ranges, one under for a single day.
    struct AlwaysTruncatedApi;

    #[async_trait]
    impl AnalyticsApi for AlwaysTruncatedApi {
        async fn query(&self, req: &QueryRequest) -> Result<Vec<ApiRow>, ApiError> {
            let limit = req.row_limit as usize;
            let count = if req.width_days() >= 2 { limit } else { limit - 1 };
            Ok((0..count).map(|i| day_row(req.start_date, &format!("q{i}"))).collect())
        }
    }

    /// Fails any call touching the configured range.
    struct FailingRangeApi {
        fail_start: NaiveDate,
        fail_end: NaiveDate,
    }

    #[async_trait]
    impl AnalyticsApi for FailingRangeApi {
        async fn query(&self, req: &QueryRequest) -> Result<Vec<ApiRow>, ApiError> {
            if req.start_date <= self.fail_end && req.end_date >= self.fail_start {
                return Err(ApiError::HttpError { status: 502 });
            }
            let mut rows = Vec::new();
            let mut day = req.start_date;
            while day <= req.end_date {
                rows.push(day_row(day, "q"));
                day += ChronoDuration::days(1);
            }
            Ok(rows)
        }
    }

    /// Completes later chunks sooner, to surface ordering bugs.
    struct ReverseLatencyApi;

    #[async_trait]
    impl AnalyticsApi for ReverseLatencyApi {
        async fn query(&self, req: &QueryRequest) -> Result<Vec<ApiRow>, ApiError> {
            let lag = 60u64.saturating_sub(u64::from(req.start_date.ordinal()));
            tokio::time::sleep(Duration::from_millis(lag)).await;
            Ok(vec![day_row(req.start_date, "q")])
        }
    }

    #[tokio::test]
    async fn test_chunked_fetch_covers_range_without_duplicates() {
        let fetcher = AdaptiveFetcher::new(PerDayApi::new(), config(25_000));
        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-20"), &dims()).await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.rows.len(), 20);

        // Chunks tile without overlap, so no de-duplication is needed: every
        // (date, query) pair appears exactly once.
        let unique: HashSet<(NaiveDate, String)> =
            outcome.rows.iter().map(|r| (r.date, r.query.clone())).collect();
        assert_eq!(unique.len(), 20);

        let days: Vec<NaiveDate> = outcome.rows.iter().map(|r| r.date).collect();
        let mut expected = Vec::new();
        let mut day = d("2024-01-01");
        while day <= d("2024-01-20") {
            expected.push(day);
            day += ChronoDuration::days(1);
        }
        assert_eq!(days, expected);
    }

    #[tokio::test]
    async fn test_narrow_range_is_one_call() {
        let api = PerDayApi::new();
        let fetcher = AdaptiveFetcher::new(api, config(25_000));
        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-07"), &dims()).await;

        assert_eq!(outcome.rows.len(), 7);
        assert_eq!(fetcher.api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recursive_splitting_terminates_and_covers_every_day() {
        let fetcher = AdaptiveFetcher::new(AlwaysTruncatedApi, config(4));
        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-07"), &dims()).await;

        assert!(outcome.failed_chunks.is_empty());
        let days: HashSet<NaiveDate> = outcome.rows.iter().map(|r| r.date).collect();
        let mut day = d("2024-01-01");
        while day <= d("2024-01-07") {
            assert!(days.contains(&day), "missing day {day}");
            day += ChronoDuration::days(1);
        }
    }

    #[tokio::test]
    async fn test_single_day_at_cap_is_typed_incomplete() {
        struct CappedDayApi;

        #[async_trait]
        impl AnalyticsApi for CappedDayApi {
            async fn query(&self, req: &QueryRequest) -> Result<Vec<ApiRow>, ApiError> {
                let limit = req.row_limit as usize;
                Ok((0..limit).map(|i| day_row(req.start_date, &format!("q{i}"))).collect())
            }
        }

        let fetcher = AdaptiveFetcher::new(CappedDayApi, config(4));
        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-01"), &dims()).await;

        assert_eq!(outcome.incomplete_days, vec![d("2024-01-01")]);
        assert_eq!(outcome.rows.len(), 4);
        assert!(outcome.failed_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_depth_bound_abandons_branch() {
        struct BottomlessApi;

        #[async_trait]
        impl AnalyticsApi for BottomlessApi {
            async fn query(&self, req: &QueryRequest) -> Result<Vec<ApiRow>, ApiError> {
                let limit = req.row_limit as usize;
                Ok((0..limit).map(|i| day_row(req.start_date, &format!("q{i}"))).collect())
            }
        }

        let config = FetchConfig { row_limit: 4, max_split_depth: 1, ..FetchConfig::default() };
        let fetcher = AdaptiveFetcher::new(BottomlessApi, config);
        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-07"), &dims()).await;

        // Every branch bottoms out on the depth bound before reaching
        // single-day chunks: a completeness gap, not a crash.
        assert!(outcome.rows.is_empty());
        assert!(!outcome.failed_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_middle_chunk_failure_degrades_partially() {
        let api = FailingRangeApi { fail_start: d("2024-01-08"), fail_end: d("2024-01-14") };
        let fetcher = AdaptiveFetcher::new(api, config(25_000));
        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-20"), &dims()).await;

        // Chunks 1 and 3 merge; the failed middle chunk is recorded.
        assert_eq!(outcome.rows.len(), 13);
        assert_eq!(outcome.failed_chunks, vec![DateChunk::new(d("2024-01-08"), d("2024-01-14"))]);
        assert!(outcome.rows.iter().all(|r| r.date < d("2024-01-08") || r.date > d("2024-01-14")));
    }

    #[tokio::test]
    async fn test_results_follow_chunk_order_not_completion_order() {
        let fetcher = AdaptiveFetcher::new(ReverseLatencyApi, config(25_000));
        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-02-09"), &dims()).await;

        let dates: Vec<NaiveDate> = outcome.rows.iter().map(|r| r.date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }

    #[tokio::test]
    async fn test_session_cache_spares_repeat_calls() {
        let fetcher = AdaptiveFetcher::new(PerDayApi::new(), config(25_000));

        fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-20"), &dims()).await;
        let calls_after_first = fetcher.api.calls.load(Ordering::SeqCst);
        assert_eq!(calls_after_first, 3);

        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-20"), &dims()).await;
        assert_eq!(fetcher.api.calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(outcome.rows.len(), 20);
    }

    #[tokio::test]
    async fn test_failed_chunk_is_not_cached() {
        let api = FailingRangeApi { fail_start: d("2024-01-01"), fail_end: d("2024-01-07") };
        let fetcher = AdaptiveFetcher::new(api, config(25_000));

        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-07"), &dims()).await;
        assert!(outcome.rows.is_empty());
        assert!(fetcher.chunk_cache().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_matches_fetch_granularity() {
        let fetcher = AdaptiveFetcher::new(PerDayApi::new(), config(25_000));
        fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-20"), &dims()).await;
        assert_eq!(fetcher.chunk_cache().len(), 3);

        let removed = fetcher.invalidate(SITE, d("2024-01-01"), d("2024-01-20"));
        assert_eq!(removed, 3);
        assert!(fetcher.chunk_cache().is_empty());
    }

    #[tokio::test]
    async fn test_per_call_timeout_degrades_to_failed_chunk() {
        struct HangingApi;

        #[async_trait]
        impl AnalyticsApi for HangingApi {
            async fn query(&self, _req: &QueryRequest) -> Result<Vec<ApiRow>, ApiError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }

        let config = FetchConfig { call_timeout: Duration::from_millis(50), ..FetchConfig::default() };
        let fetcher = AdaptiveFetcher::new(HangingApi, config);
        let outcome = fetcher.fetch(SITE, d("2024-01-01"), d("2024-01-07"), &dims()).await;

        assert!(outcome.rows.is_empty());
        assert_eq!(outcome.failed_chunks, vec![DateChunk::new(d("2024-01-01"), d("2024-01-07"))]);
    }
}
