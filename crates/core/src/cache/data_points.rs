//! Data point storage and the cache writer.
//!
//! Provides idempotent batch upserts of fetched analytics rows, plus the
//! explicit retention sweep and per-site range clear. A row's natural key is
//! the full dimension tuple (site, date, query, page, country, device), with
//! empty-string sentinels keeping the key total.

use super::connection::CacheDb;
use crate::Error;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

/// Rows per write batch. Each batch is one trip to the connection thread;
/// rows within a batch fail independently.
const WRITE_BATCH_SIZE: usize = 100;

/// Maximum error messages retained for diagnostics.
const MAX_ERROR_SAMPLES: usize = 5;

/// One cached analytics observation.
///
/// Dimension slots that are not part of the row's grouping hold the empty
/// string sentinel, never a NULL, so the uniqueness key is always total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPoint {
    pub site: String,
    pub date: NaiveDate,
    pub query: String,
    pub page: String,
    pub country: String,
    pub device: String,
    pub clicks: i64,
    pub impressions: i64,
    pub ctr: f64,
    pub position: f64,
    pub fetched_at: chrono::DateTime<Utc>,
}

impl DataPoint {
    /// A data point with all dimension slots at the empty sentinel.
    pub fn new(site: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            site: site.into(),
            date,
            query: String::new(),
            page: String::new(),
            country: String::new(),
            device: String::new(),
            clicks: 0,
            impressions: 0,
            ctr: 0.0,
            position: 0.0,
            fetched_at: Utc::now(),
        }
    }
}

/// Result of a batch write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// Rows successfully upserted.
    pub written: usize,
    /// Rows that failed.
    pub failed: usize,
    /// Up to five sampled error messages for diagnostics.
    pub errors: Vec<String>,
}

impl CacheDb {
    /// Upsert fetched rows for a site.
    ///
    /// Gets or creates the site record first (owner required), processes
    /// rows in fixed batches with per-row isolation, and bumps the site's
    /// last-synced timestamp afterwards. One row's failure never aborts the
    /// batch; failures are counted and sampled into the outcome. Rewriting
    /// an identical row refreshes only its fetched_at.
    pub async fn write_data_points(
        &self, site_url: &str, owner: &str, rows: &[DataPoint],
    ) -> Result<WriteOutcome, Error> {
        let site = self.get_or_create_site(site_url, owner).await?;
        let fetched_at = Utc::now().to_rfc3339();

        let mut outcome = WriteOutcome::default();

        for batch in rows.chunks(WRITE_BATCH_SIZE) {
            let batch: Vec<DataPoint> = batch.to_vec();
            let site_id = site.id;
            let fetched_at = fetched_at.clone();

            let (written, failed, errors) = self
                .conn
                .call(move |conn| -> Result<(usize, usize, Vec<String>), Error> {
                    let mut written = 0usize;
                    let mut failed = 0usize;
                    let mut errors = Vec::new();

                    for point in &batch {
                        let result = conn.execute(
                            "INSERT INTO data_points (
                                site_id, date, query, page, country, device,
                                clicks, impressions, ctr, position, fetched_at
                            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                            ON CONFLICT(site_id, date, query, page, country, device) DO UPDATE SET
                                clicks = excluded.clicks,
                                impressions = excluded.impressions,
                                ctr = excluded.ctr,
                                position = excluded.position,
                                fetched_at = excluded.fetched_at",
                            params![
                                site_id,
                                point.date.to_string(),
                                point.query,
                                point.page,
                                point.country,
                                point.device,
                                point.clicks,
                                point.impressions,
                                point.ctr,
                                point.position,
                                fetched_at,
                            ],
                        );

                        match result {
                            Ok(_) => written += 1,
                            Err(e) => {
                                failed += 1;
                                if errors.len() < MAX_ERROR_SAMPLES {
                                    errors.push(format!("{}/{}: {e}", point.date, point.query));
                                }
                            }
                        }
                    }

                    Ok((written, failed, errors))
                })
                .await
                .map_err(Error::from)?;

            outcome.written += written;
            outcome.failed += failed;
            for e in errors {
                if outcome.errors.len() < MAX_ERROR_SAMPLES {
                    outcome.errors.push(e);
                }
            }
        }

        if outcome.failed > 0 {
            tracing::warn!(
                site = site_url,
                failed = outcome.failed,
                samples = ?outcome.errors,
                "some data points failed to write"
            );
        }

        self.touch_site_sync(site_url).await?;

        Ok(outcome)
    }

    /// Delete data points older than the upstream retention window.
    ///
    /// Returns the number of deleted rows.
    pub async fn purge_old_data_points(&self, retention_days: u32) -> Result<u64, Error> {
        let cutoff = (Utc::now() - Duration::days(i64::from(retention_days)))
            .date_naive()
            .to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM data_points WHERE date < ?1", params![cutoff])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a site's data points inside an inclusive date range.
    ///
    /// Returns the number of deleted rows.
    pub async fn clear_data_points(&self, site_url: &str, start: NaiveDate, end: NaiveDate) -> Result<u64, Error> {
        let site_url = site_url.to_string();
        let (start, end) = (start.to_string(), end.to_string());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM data_points WHERE site_id = (SELECT id FROM sites WHERE url = ?1)
                     AND date >= ?2 AND date <= ?3",
                    params![site_url, start, end],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
