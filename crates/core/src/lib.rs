//! Core types and shared functionality for searchlens.
//!
//! This crate provides:
//! - Durable search-analytics cache with SQLite backend
//! - Typed dimension-combination model
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod dimensions;
pub mod error;

pub use cache::{CacheDb, CacheRead, DataPoint, MissReason, SiteRecord, WriteOutcome};
pub use config::AppConfig;
pub use dimensions::{Dimension, DimensionSet};
pub use error::Error;
