//! SQLite-backed durable cache for search-analytics data points.
//!
//! This module provides a persistent, dimension-keyed cache using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - One row per (site, date, query, page, country, device) tuple
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Dimension-aware reads with a single-freshest-record freshness check
//! - Idempotent batch upserts, retention sweep, and range clears

pub mod connection;
pub mod data_points;
pub mod migrations;
pub mod reader;
pub mod sites;

pub use crate::Error;

pub use connection::CacheDb;
pub use data_points::{DataPoint, WriteOutcome};
pub use reader::{CacheRead, MissReason};
pub use sites::SiteRecord;
