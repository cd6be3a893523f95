//! Dimension-aware cache reads.
//!
//! Every stored row carries all dimension slots, so a read for a given
//! combination filters by explicit per-slot predicates derived from the
//! closed [`DimensionSet`] enum. The date range is always an implicit
//! filter. A whole queried window is fresh only if the single freshest
//! matching record is within the max age; there is no per-row freshness.

use std::collections::BTreeMap;

use super::connection::CacheDb;
use super::data_points::DataPoint;
use crate::Error;
use crate::dimensions::{DimensionSet, SlotRule};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio_rusqlite::params;

/// Why a cache read did not produce rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// The site has never been cached.
    UnknownSite,
    /// No stored rows match the requested combination and range.
    NoRows,
    /// Matching rows exist but the freshest one is older than the max age.
    Stale,
    /// The store failed; degraded to a miss rather than an error.
    StoreError,
}

/// Outcome of a dimension-aware cache read.
#[derive(Debug, Clone)]
pub enum CacheRead {
    Hit(Vec<DataPoint>),
    Miss(MissReason),
}

impl CacheRead {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheRead::Hit(_))
    }
}

/// WHERE fragment for the slot predicates of a combination.
fn slot_filter(set: DimensionSet) -> String {
    set.slot_rules()
        .iter()
        .map(|(dim, rule)| match rule {
            SlotRule::Empty => format!("{} = ''", dim.as_str()),
            SlotRule::NonEmpty => format!("{} != ''", dim.as_str()),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl CacheDb {
    /// Read cached rows for a site, date range, and dimension combination.
    ///
    /// Returns a miss for an unknown site, no matching rows, or a stale
    /// window (freshest matching record older than `max_age_hours`). Store
    /// failures are logged and degrade to a miss; they never surface as
    /// errors to the caller.
    pub async fn read_data_points(
        &self, site_url: &str, start: NaiveDate, end: NaiveDate, set: DimensionSet, max_age_hours: i64,
    ) -> CacheRead {
        match self.try_read(site_url, start, end, set, max_age_hours).await {
            Ok(read) => read,
            Err(e) => {
                tracing::warn!(site = site_url, error = %e, "cache read failed, treating as miss");
                CacheRead::Miss(MissReason::StoreError)
            }
        }
    }

    async fn try_read(
        &self, site_url: &str, start: NaiveDate, end: NaiveDate, set: DimensionSet, max_age_hours: i64,
    ) -> Result<CacheRead, Error> {
        let Some(site) = self.get_site(site_url).await? else {
            return Ok(CacheRead::Miss(MissReason::UnknownSite));
        };

        let filter = slot_filter(set);
        let site_id = site.id;
        let (start_s, end_s) = (start.to_string(), end.to_string());

        let freshness_sql = format!(
            "SELECT MAX(fetched_at) FROM data_points
             WHERE site_id = ?1 AND date >= ?2 AND date <= ?3 AND {filter}"
        );
        let freshest: Option<String> = self
            .conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let max: Option<String> =
                    conn.query_row(&freshness_sql, params![site_id, start_s, end_s], |row| row.get(0))?;
                Ok(max)
            })
            .await
            .map_err(Error::from)?;

        let Some(freshest) = freshest else {
            return Ok(CacheRead::Miss(MissReason::NoRows));
        };

        let fetched_at = DateTime::parse_from_rfc3339(&freshest)
            .map_err(|e| Error::InvalidInput(format!("bad fetched_at in store: {e}")))?
            .with_timezone(&Utc);
        if Utc::now() - fetched_at > Duration::hours(max_age_hours) {
            tracing::debug!(site = site_url, freshest = %freshest, "cached window is stale");
            return Ok(CacheRead::Miss(MissReason::Stale));
        }

        let site_owned = site_url.to_string();
        let (start_s, end_s) = (start.to_string(), end.to_string());
        let rows_sql = format!(
            "SELECT date, query, page, country, device,
                    clicks, impressions, ctr, position, fetched_at
             FROM data_points
             WHERE site_id = ?1 AND date >= ?2 AND date <= ?3 AND {filter}
             ORDER BY date ASC, query ASC, page ASC"
        );
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<DataPoint>, Error> {
                let mut stmt = conn.prepare(&rows_sql)?;
                let rows = stmt
                    .query_map(params![site_id, start_s, end_s], |row| {
                        let date: String = row.get(0)?;
                        let fetched: String = row.get(9)?;
                        Ok((date, fetched, DataPoint {
                            site: site_owned.clone(),
                            date: NaiveDate::MIN,
                            query: row.get(1)?,
                            page: row.get(2)?,
                            country: row.get(3)?,
                            device: row.get(4)?,
                            clicks: row.get(5)?,
                            impressions: row.get(6)?,
                            ctr: row.get(7)?,
                            position: row.get(8)?,
                            fetched_at: Utc::now(),
                        }))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut points = Vec::with_capacity(rows.len());
                for (date, fetched, mut point) in rows {
                    point.date = date
                        .parse()
                        .map_err(|e| Error::InvalidInput(format!("bad date in store: {e}")))?;
                    point.fetched_at = DateTime::parse_from_rfc3339(&fetched)
                        .map_err(|e| Error::InvalidInput(format!("bad fetched_at in store: {e}")))?
                        .with_timezone(&Utc);
                    points.push(point);
                }
                Ok(points)
            })
            .await
            .map_err(Error::from)?;

        if rows.is_empty() {
            return Ok(CacheRead::Miss(MissReason::NoRows));
        }

        if set.aggregates() {
            return Ok(CacheRead::Hit(aggregate_totals(rows, start)));
        }

        Ok(CacheRead::Hit(rows))
    }
}

/// Fold rows into one total per (query, page) pair.
///
/// Clicks, impressions, and position sum; CTR is recomputed click-weighted
/// (total clicks over total impressions). Per-page totals have empty query
/// slots, so the same pair key serves both aggregated shapes. The aggregate
/// carries the range start date since the key slot must hold some value.
fn aggregate_totals(rows: Vec<DataPoint>, range_start: NaiveDate) -> Vec<DataPoint> {
    let mut totals: BTreeMap<(String, String), DataPoint> = BTreeMap::new();

    for row in rows {
        let entry = totals.entry((row.query.clone(), row.page.clone())).or_insert_with(|| DataPoint {
            query: row.query.clone(),
            page: row.page.clone(),
            fetched_at: row.fetched_at,
            ..DataPoint::new(row.site.clone(), range_start)
        });
        entry.clicks += row.clicks;
        entry.impressions += row.impressions;
        entry.position += row.position;
        if row.fetched_at > entry.fetched_at {
            entry.fetched_at = row.fetched_at;
        }
    }

    totals
        .into_values()
        .map(|mut point| {
            point.ctr = if point.impressions > 0 {
                point.clicks as f64 / point.impressions as f64
            } else {
                0.0
            };
            point
        })
        .collect()
}
