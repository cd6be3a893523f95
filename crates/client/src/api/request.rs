//! Search-analytics API request types and validation.

use chrono::NaiveDate;
use searchlens_core::Dimension;
use serde::Serialize;

use crate::api::ApiError;

/// Hard row cap the upstream enforces per call.
pub const MAX_ROW_LIMIT: u32 = 25_000;

/// One query against the upstream search-analytics API.
///
/// The upstream accepts {site, date range, dimension list, row limit} and
/// returns at most `row_limit` rows with no truncation flag.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    /// Site (property) URL, e.g. "https://example.com".
    #[serde(skip)]
    pub site: String,

    /// Inclusive range start (day granularity).
    pub start_date: NaiveDate,

    /// Inclusive range end (day granularity).
    pub end_date: NaiveDate,

    /// Grouping dimensions; key order in response rows matches this order.
    pub dimensions: Vec<Dimension>,

    /// Maximum rows to return (upstream caps at 25,000 regardless).
    pub row_limit: u32,
}

impl QueryRequest {
    /// Validate the query request parameters.
    ///
    /// Returns an error if any parameters are out of range or malformed.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.site.is_empty() {
            return Err(ApiError::InvalidRequest("site cannot be empty".to_string()));
        }

        if url::Url::parse(&self.site).is_err() {
            return Err(ApiError::InvalidRequest(format!("site is not a valid URL: {}", self.site)));
        }

        if self.start_date > self.end_date {
            return Err(ApiError::InvalidRequest(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            )));
        }

        if self.dimensions.is_empty() {
            return Err(ApiError::InvalidRequest("dimensions cannot be empty".to_string()));
        }

        if self.row_limit == 0 || self.row_limit > MAX_ROW_LIMIT {
            return Err(ApiError::InvalidRequest(format!(
                "row_limit must be 1-{MAX_ROW_LIMIT}, got {}",
                self.row_limit
            )));
        }

        Ok(())
    }

    /// Width of the requested range in days (inclusive of both endpoints).
    pub fn width_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}
