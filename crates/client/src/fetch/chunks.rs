//! Date-range chunking.
//!
//! Wide ranges are tiled into fixed-width, contiguous, non-overlapping
//! chunks; a chunk whose result hits the row cap is split at the
//! floor-midpoint day into two adjacent sub-chunks.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// A contiguous inclusive sub-range of an outer date range, fetched as one
/// API call (or further split).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateChunk {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateChunk {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Width in days, counting both endpoints.
    pub fn width_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Split at the floor-midpoint day into two adjacent halves.
    ///
    /// Returns None for a single-day chunk, which has no sub-day
    /// granularity to split into.
    pub fn split_midpoint(&self) -> Option<(DateChunk, DateChunk)> {
        if self.width_days() <= 1 {
            return None;
        }
        let mid = self.start + Duration::days((self.end - self.start).num_days() / 2);
        Some((DateChunk::new(self.start, mid), DateChunk::new(mid + Duration::days(1), self.end)))
    }
}

impl std::fmt::Display for DateChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Tile an inclusive outer range into fixed-width chunks.
///
/// Chunks are contiguous and non-overlapping; the final chunk is truncated
/// to the exact end date. An inverted range tiles to nothing.
pub fn tile_range(start: NaiveDate, end: NaiveDate, chunk_days: u32) -> Vec<DateChunk> {
    let mut chunks = Vec::new();
    if start > end || chunk_days == 0 {
        return chunks;
    }

    let width = Duration::days(i64::from(chunk_days) - 1);
    let mut cursor = start;
    while cursor <= end {
        let chunk_end = (cursor + width).min(end);
        chunks.push(DateChunk::new(cursor, chunk_end));
        cursor = chunk_end + Duration::days(1);
    }
    chunks
}
