//! Site record operations.
//!
//! Each cached property is a row in the `sites` table. The owner is a
//! required parameter of every get-or-create: there is no process-wide
//! default owner to fall back on.

use super::connection::CacheDb;
use crate::Error;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A tracked site (property) in the durable cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: i64,
    pub url: String,
    pub owner: String,
    pub created_at: String,
    pub last_synced_at: Option<String>,
}

impl CacheDb {
    /// Get the site row for a URL, or create it for the given owner.
    ///
    /// Idempotent: repeated calls return the existing row unchanged (the
    /// owner of an existing site is not rewritten).
    pub async fn get_or_create_site(&self, url: &str, owner: &str) -> Result<SiteRecord, Error> {
        if url.is_empty() {
            return Err(Error::InvalidInput("site url cannot be empty".into()));
        }
        if owner.is_empty() {
            return Err(Error::InvalidInput("site owner cannot be empty".into()));
        }

        let url = url.to_string();
        let owner = owner.to_string();
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<SiteRecord, Error> {
                conn.execute(
                    "INSERT INTO sites (url, owner, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(url) DO NOTHING",
                    params![url, owner, now],
                )?;

                let record = conn.query_row(
                    "SELECT id, url, owner, created_at, last_synced_at FROM sites WHERE url = ?1",
                    params![url],
                    |row| {
                        Ok(SiteRecord {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            owner: row.get(2)?,
                            created_at: row.get(3)?,
                            last_synced_at: row.get(4)?,
                        })
                    },
                )?;
                Ok(record)
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a site by URL.
    ///
    /// Returns None if the site has never been cached.
    pub async fn get_site(&self, url: &str) -> Result<Option<SiteRecord>, Error> {
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<Option<SiteRecord>, Error> {
                let result = conn.query_row(
                    "SELECT id, url, owner, created_at, last_synced_at FROM sites WHERE url = ?1",
                    params![url],
                    |row| {
                        Ok(SiteRecord {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            owner: row.get(2)?,
                            created_at: row.get(3)?,
                            last_synced_at: row.get(4)?,
                        })
                    },
                );

                match result {
                    Ok(record) => Ok(Some(record)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Bump a site's last-synced timestamp to now.
    pub async fn touch_site_sync(&self, url: &str) -> Result<(), Error> {
        let url = url.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "UPDATE sites SET last_synced_at = ?1 WHERE url = ?2",
                    params![now, url],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// List all tracked sites, oldest first.
    pub async fn list_sites(&self) -> Result<Vec<SiteRecord>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<SiteRecord>, Error> {
                let mut stmt =
                    conn.prepare("SELECT id, url, owner, created_at, last_synced_at FROM sites ORDER BY id ASC")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(SiteRecord {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            owner: row.get(2)?,
                            created_at: row.get(3)?,
                            last_synced_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)
    }
}
