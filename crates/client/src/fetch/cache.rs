//! Session-local chunk cache.
//!
//! Short-TTL, per-chunk cache that spares the fetcher redundant upstream
//! calls within a session. Entries are keyed by (site, chunk start, chunk
//! end), expire 24h after write, and are evicted oldest-first in a batch of
//! half the cache when the capacity quota is hit. A cache-write failure
//! never fails the surrounding fetch.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use searchlens_core::DataPoint;
use sha2::{Digest, Sha256};

use super::chunks::tile_range;

/// Entry capacity quota exceeded; the write needs an eviction first.
#[derive(Debug, PartialEq, Eq)]
struct QuotaExceeded;

#[derive(Debug, Clone)]
struct ChunkCacheEntry {
    rows: Vec<DataPoint>,
    cached_at: DateTime<Utc>,
}

/// Compute the cache key for one chunk of one site.
pub fn chunk_key(site: &str, start: NaiveDate, end: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site.as_bytes());
    hasher.update(b"\n");
    hasher.update(start.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(end.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Session chunk cache with TTL expiry and quota eviction.
#[derive(Debug)]
pub struct ChunkCache {
    entries: Mutex<HashMap<String, ChunkCacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ChunkCache {
    pub fn new(ttl_hours: i64, max_entries: usize) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl: Duration::hours(ttl_hours), max_entries }
    }

    /// Get cached rows for a chunk.
    ///
    /// An expired entry is treated as absent and lazily deleted.
    pub fn get(&self, site: &str, start: NaiveDate, end: NaiveDate) -> Option<Vec<DataPoint>> {
        let key = chunk_key(site, start, end);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get(&key) {
            Some(entry) if Utc::now() - entry.cached_at <= self.ttl => Some(entry.rows.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Cache rows for a chunk.
    ///
    /// On a quota failure, evicts the oldest half of the entries and retries
    /// once; a second failure is logged and swallowed.
    pub fn set(&self, site: &str, start: NaiveDate, end: NaiveDate, rows: Vec<DataPoint>) {
        let key = chunk_key(site, start, end);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = ChunkCacheEntry { rows, cached_at: Utc::now() };

        if Self::try_insert(&mut entries, self.max_entries, key.clone(), entry.clone()).is_err() {
            let evicted = Self::evict_oldest_half(&mut entries);
            tracing::debug!(evicted, "chunk cache quota hit, evicted oldest entries");

            if Self::try_insert(&mut entries, self.max_entries, key, entry).is_err() {
                tracing::warn!("chunk cache write failed after eviction, dropping entry");
            }
        }
    }

    /// Delete the cached chunks tiling an outer range.
    ///
    /// Recomputes the same fixed chunk boundaries the fetcher uses, so
    /// invalidation granularity matches fetch granularity. Returns the
    /// number of entries actually removed.
    pub fn invalidate_range(&self, site: &str, start: NaiveDate, end: NaiveDate, chunk_days: u32) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        tile_range(start, end, chunk_days)
            .into_iter()
            .filter(|chunk| entries.remove(&chunk_key(site, chunk.start, chunk.end)).is_some())
            .count()
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_insert(
        entries: &mut HashMap<String, ChunkCacheEntry>, max_entries: usize, key: String, entry: ChunkCacheEntry,
    ) -> Result<(), QuotaExceeded> {
        if entries.len() >= max_entries && !entries.contains_key(&key) {
            return Err(QuotaExceeded);
        }
        entries.insert(key, entry);
        Ok(())
    }

    /// Remove the oldest half of the entries by write timestamp.
    fn evict_oldest_half(entries: &mut HashMap<String, ChunkCacheEntry>) -> usize {
        let mut by_age: Vec<(String, DateTime<Utc>)> =
            entries.iter().map(|(k, v)| (k.clone(), v.cached_at)).collect();
        by_age.sort_by_key(|(_, cached_at)| *cached_at);

        let to_evict = by_age.len().div_ceil(2);
        for (key, _) in by_age.into_iter().take(to_evict) {
            entries.remove(&key);
        }
        to_evict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn rows(date: &str) -> Vec<DataPoint> {
        vec![DataPoint::new("https://example.com", d(date))]
    }

    #[test]
    fn test_set_and_get() {
        let cache = ChunkCache::new(24, 16);
        cache.set("https://example.com", d("2024-01-01"), d("2024-01-07"), rows("2024-01-01"));

        let hit = cache.get("https://example.com", d("2024-01-01"), d("2024-01-07"));
        assert_eq!(hit.unwrap().len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let cache = ChunkCache::new(24, 16);
        assert!(cache.get("https://example.com", d("2024-01-01"), d("2024-01-07")).is_none());
    }

    #[test]
    fn test_key_includes_chunk_bounds() {
        let cache = ChunkCache::new(24, 16);
        cache.set("https://example.com", d("2024-01-01"), d("2024-01-07"), rows("2024-01-01"));

        assert!(cache.get("https://example.com", d("2024-01-01"), d("2024-01-08")).is_none());
        assert!(cache.get("https://other.com", d("2024-01-01"), d("2024-01-07")).is_none());
    }

    #[test]
    fn test_expired_entry_lazily_deleted() {
        // Zero-hour TTL: everything written is already expired.
        let cache = ChunkCache::new(0, 16);
        cache.set("https://example.com", d("2024-01-01"), d("2024-01-07"), rows("2024-01-01"));
        assert_eq!(cache.len(), 1);

        assert!(cache.get("https://example.com", d("2024-01-01"), d("2024-01-07")).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_quota_eviction_drops_oldest_half_and_write_succeeds() {
        let cache = ChunkCache::new(24, 8);
        for day in 1..=8 {
            let date = format!("2024-01-{day:02}");
            cache.set("https://example.com", d(&date), d(&date), rows(&date));
        }
        assert_eq!(cache.len(), 8);

        cache.set("https://example.com", d("2024-02-01"), d("2024-02-01"), rows("2024-02-01"));

        // At least half of the pre-eviction entries are gone and the
        // retried write landed.
        assert!(cache.len() <= 5);
        assert!(cache.get("https://example.com", d("2024-02-01"), d("2024-02-01")).is_some());
    }

    #[test]
    fn test_rewrite_existing_key_never_hits_quota() {
        let cache = ChunkCache::new(24, 1);
        cache.set("https://example.com", d("2024-01-01"), d("2024-01-07"), rows("2024-01-01"));
        cache.set("https://example.com", d("2024-01-01"), d("2024-01-07"), rows("2024-01-02"));
        assert_eq!(cache.len(), 1);

        let hit = cache.get("https://example.com", d("2024-01-01"), d("2024-01-07")).unwrap();
        assert_eq!(hit[0].date, d("2024-01-02"));
    }

    #[test]
    fn test_invalidate_range_matches_fetch_granularity() {
        let cache = ChunkCache::new(24, 16);
        // Same tiling the fetcher computes for [01-01, 01-20].
        cache.set("https://example.com", d("2024-01-01"), d("2024-01-07"), rows("2024-01-01"));
        cache.set("https://example.com", d("2024-01-08"), d("2024-01-14"), rows("2024-01-08"));
        cache.set("https://example.com", d("2024-01-15"), d("2024-01-20"), rows("2024-01-15"));
        // A chunk outside the tiling survives.
        cache.set("https://example.com", d("2024-02-01"), d("2024-02-07"), rows("2024-02-01"));

        let removed = cache.invalidate_range("https://example.com", d("2024-01-01"), d("2024-01-20"), 7);
        assert_eq!(removed, 3);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("https://example.com", d("2024-02-01"), d("2024-02-07")).is_some());
    }

    #[test]
    fn test_chunk_key_stability() {
        let a = chunk_key("https://example.com", d("2024-01-01"), d("2024-01-07"));
        let b = chunk_key("https://example.com", d("2024-01-01"), d("2024-01-07"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
