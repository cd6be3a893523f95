//! Search-analytics API response types and normalization.

use chrono::{NaiveDate, Utc};
use searchlens_core::{DataPoint, Dimension};
use serde::Deserialize;

use crate::api::ApiError;

/// Raw response from the search-analytics API.
///
/// The upstream reports no truncation flag; truncation is inferred solely
/// by comparing `rows.len()` against the requested row limit.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub rows: Vec<ApiRow>,
}

/// One raw metrics row. `keys` holds dimension values in the order the
/// dimensions were requested.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRow {
    pub keys: Vec<String>,
    pub clicks: i64,
    pub impressions: i64,
    #[serde(default)]
    pub ctr: f64,
    #[serde(default)]
    pub position: f64,
}

/// Normalize raw rows into data points with every dimension slot populated.
///
/// Key values are matched to slots by the requested dimension order. Rows
/// grouped without a date dimension are stamped with `fallback_date` (the
/// range start) so the store's key tuple stays total; unrequested slots get
/// the empty sentinel.
pub fn normalize_rows(
    site: &str, dimensions: &[Dimension], rows: Vec<ApiRow>, fallback_date: NaiveDate,
) -> Result<Vec<DataPoint>, ApiError> {
    let fetched_at = Utc::now();
    let mut points = Vec::with_capacity(rows.len());

    for row in rows {
        if row.keys.len() != dimensions.len() {
            return Err(ApiError::Parse(format!(
                "row has {} keys for {} dimensions",
                row.keys.len(),
                dimensions.len()
            )));
        }

        let mut point = DataPoint {
            clicks: row.clicks,
            impressions: row.impressions,
            ctr: row.ctr,
            position: row.position,
            fetched_at,
            ..DataPoint::new(site, fallback_date)
        };

        for (dim, value) in dimensions.iter().zip(row.keys) {
            match dim {
                Dimension::Date => {
                    point.date = value
                        .parse()
                        .map_err(|e| ApiError::Parse(format!("bad date key {value:?}: {e}")))?;
                }
                Dimension::Query => point.query = value,
                Dimension::Page => point.page = value,
                Dimension::Country => point.country = value,
                Dimension::Device => point.device = value,
            }
        }

        points.push(point);
    }

    Ok(points)
}
