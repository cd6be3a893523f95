//! searchlens operator CLI.
//!
//! Wires configuration, the durable cache, and the upstream client into a
//! small operator surface: run queries, sweep retention, clear ranges.
//! Logging goes to stderr so stdout stays parseable JSON.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use searchlens_client::{AdaptiveFetcher, AnalyticsService, ApiConfig, FetchConfig, QuerySpec, SearchAnalyticsClient};
use searchlens_core::{AppConfig, CacheDb, Dimension, DimensionSet};

#[derive(Parser)]
#[command(name = "searchlens", about = "Search-analytics cache engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query a series through the cache engine.
    Query {
        /// Site (property) URL.
        #[arg(long)]
        site: String,
        /// Owner of the site record.
        #[arg(long)]
        owner: String,
        /// Inclusive range start (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,
        /// Inclusive range end (YYYY-MM-DD).
        #[arg(long)]
        end: NaiveDate,
        /// Comma-separated dimensions (e.g. "date,query").
        #[arg(long, default_value = "date,query")]
        dimensions: String,
        /// Bypass the durable cache read.
        #[arg(long)]
        force_refresh: bool,
    },
    /// Delete data points older than the retention window.
    Sweep,
    /// Clear a site's cached rows for a date range.
    Clear {
        #[arg(long)]
        site: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// List tracked sites.
    Sites,
}

fn parse_dimensions(spec: &str) -> Result<DimensionSet> {
    let dims = spec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<Dimension>)
        .collect::<Result<Vec<_>, _>>()
        .context("invalid dimension list")?;
    DimensionSet::from_dimensions(&dims).context("unsupported dimension combination")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to load configuration")?;
    let db = CacheDb::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open cache database at {}", config.db_path.display()))?;

    match cli.command {
        Command::Query { site, owner, start, end, dimensions, force_refresh } => {
            let dimensions = parse_dimensions(&dimensions)?;
            let api_key = config.require_api_key()?.to_string();
            let client = SearchAnalyticsClient::new(ApiConfig {
                api_key,
                base_url: config.base_url.clone(),
                timeout: config.timeout(),
                user_agent: config.user_agent.clone(),
            })?;
            let fetcher = AdaptiveFetcher::new(client, FetchConfig::from_app(&config));
            let service = AnalyticsService::new(db, fetcher);

            let outcome = service
                .query_series(QuerySpec {
                    site,
                    owner,
                    start,
                    end,
                    dimensions,
                    max_age_hours: config.max_age_hours,
                    force_refresh,
                })
                .await?;

            tracing::info!(
                source = ?outcome.source,
                rows = outcome.rows.len(),
                written = outcome.written,
                incomplete_days = outcome.incomplete_days.len(),
                failed_chunks = outcome.failed_chunks.len(),
                "query finished"
            );
            println!("{}", serde_json::to_string_pretty(&outcome.rows)?);
        }
        Command::Sweep => {
            let deleted = db.purge_old_data_points(config.retention_days).await?;
            tracing::info!(deleted, retention_days = config.retention_days, "retention sweep finished");
            println!("{}", serde_json::json!({ "deleted": deleted }));
        }
        Command::Clear { site, start, end } => {
            let deleted = db.clear_data_points(&site, start, end).await?;
            tracing::info!(site, deleted, "cleared cached range");
            println!("{}", serde_json::json!({ "deleted": deleted }));
        }
        Command::Sites => {
            let sites = db.list_sites().await?;
            println!("{}", serde_json::to_string_pretty(&sites)?);
        }
    }

    Ok(())
}
