//! litecache command line entry point.
//!
//! Opens the cache described by the usual configuration layers, runs one
//! command against it and closes it again. Logging goes to stderr so command
//! output on stdout stays scriptable.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use litecache_core::{Cache, CacheConfig, Error};
use tracing_subscriber::EnvFilter;

mod output;

use output::{EntryView, Report};

/// Inspect and maintain a litecache database
#[derive(Parser)]
#[command(name = "litecache")]
#[command(version, about = "SQLite-backed key-value cache")]
struct Args {
    /// Database file (overrides LITECACHE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a value
    Set {
        key: String,
        value: String,
        /// Time to live in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },

    /// Print the value for a key
    Get { key: String },

    /// Remove a key
    Del { key: String },

    /// Show a key with its timestamps
    Inspect { key: String },

    /// Evict the least recently used fraction of entries
    Purge {
        /// Fraction in [0, 1] (default: configured purge percent)
        #[arg(long)]
        fraction: Option<f64>,
    },

    /// Delete expired entries now
    Sweep,

    /// Number of stored entries
    Count,

    /// Delete the database files
    Destroy,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(db: Option<PathBuf>) -> Result<CacheConfig> {
    let mut config = CacheConfig::load().context("loading configuration")?;
    if let Some(db) = db {
        config.db_path = db;
    }
    Ok(config)
}

/// Run one command. The cache is closed afterwards, or destroyed for
/// `destroy`; on error it is dropped, which stops maintenance.
async fn run(cache: Cache, command: Command, default_fraction: f64) -> Result<Report> {
    let report = match command {
        Command::Set { key, value, ttl } => {
            cache.set(&key, value.as_bytes(), Duration::from_secs(ttl)).await?;
            Report::Stored { key, ttl_secs: ttl }
        }
        Command::Get { key } => match cache.get(&key).await? {
            Some(value) => Report::Value { key, value: String::from_utf8_lossy(&value).into_owned() },
            None => return Err(Error::CacheMiss(key).into()),
        },
        Command::Del { key } => {
            cache.del(&key).await?;
            Report::Deleted { key }
        }
        Command::Inspect { key } => match cache.inspect(&key).await? {
            Some(entry) => Report::Entry(EntryView::from(entry)),
            None => return Err(Error::CacheMiss(key).into()),
        },
        Command::Purge { fraction } => {
            let outcome = cache.purge(fraction.unwrap_or(default_fraction)).await?;
            Report::Purged { total: outcome.total, deleted: outcome.deleted }
        }
        Command::Sweep => Report::Swept { deleted: cache.reclaim_expired().await? },
        Command::Count => Report::Count { entries: cache.len().await? },
        Command::Destroy => {
            let path = cache.config().db_path.clone();
            cache.destroy().await?;
            return Ok(Report::Destroyed { path });
        }
    };
    cache.close().await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = load_config(args.db)?;
    let path = config.db_path.clone();
    let default_fraction = config.purge_percent;
    tracing::debug!(path = %path.display(), "opening cache");
    let cache = Cache::open(config).await.with_context(|| format!("opening {}", path.display()))?;

    let report = run(cache, args.command, default_fraction).await?;
    println!("{}", report.render(args.json)?);
    Ok(())
}
