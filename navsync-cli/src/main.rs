//! NavSync CLI: fetch, serve and durable-cache commands.
//!
//! Commands:
//! - `fetch`: fetch keys through the limiter, cache and fallback, print a summary
//! - `serve`: warm the cache, then keep it fresh on a schedule for a while
//! - `cache status`: count durable records per data type and freshness
//! - `cache get`: print one cached value
//! - `cache clear`: delete every durable record
//! - `config`: print the effective configuration as TOML

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use navsync_core::{
    CsvSource, DataSource, DataType, FetchProgress, FileStore, HttpSource, SyncConfig, SyncCore,
    SyntheticSource,
};

#[derive(Parser)]
#[command(
    name = "navsync",
    about = "NavSync CLI: rate-limited fetching and tiered caching of fund data"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Durable cache directory.
    #[arg(long, global = true, default_value = "data/cache")]
    cache_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PrimarySource {
    /// `sources.http` from the config file.
    Http,
    /// Deterministic generated series (no network).
    Synthetic,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch keys and write them through the cache.
    Fetch {
        /// Keys to fetch (e.g., F001 F002).
        #[arg(required = true)]
        keys: Vec<String>,

        /// Data type: latest_value, history, metadata, indicator.
        #[arg(long, default_value = "history")]
        data_type: DataType,

        /// Primary upstream source.
        #[arg(long, value_enum, default_value = "http")]
        source: PrimarySource,

        /// CSV snapshot to use as fallback (overrides `sources.csv_path`).
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Serve cached keys without fetching them again.
        #[arg(long, default_value_t = false)]
        missing_only: bool,

        /// Print fetched values as JSON.
        #[arg(long, default_value_t = false)]
        print: bool,
    },
    /// Warm the cache, then refresh it on an interval.
    Serve {
        /// Keys to keep fresh.
        #[arg(required = true)]
        keys: Vec<String>,

        #[arg(long, default_value = "latest_value")]
        data_type: DataType,

        #[arg(long, value_enum, default_value = "http")]
        source: PrimarySource,

        #[arg(long)]
        csv: Option<PathBuf>,

        /// Refresh interval in seconds.
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,

        /// Stop after this many seconds.
        #[arg(long, default_value_t = 3600)]
        duration_secs: u64,
    },
    /// Durable cache commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Count durable records by data type and freshness.
    Status,
    /// Print one cached value.
    Get {
        key: String,
        #[arg(long, default_value = "history")]
        data_type: DataType,
    },
    /// Delete every durable record.
    Clear {
        /// Actually delete (without this flag, only reports what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Fetch {
            keys,
            data_type,
            source,
            csv,
            missing_only,
            print,
        } => run_fetch(&config, &cli.cache_dir, keys, data_type, source, csv, missing_only, print),
        Commands::Serve {
            keys,
            data_type,
            source,
            csv,
            interval_secs,
            duration_secs,
        } => run_serve(
            &config,
            &cli.cache_dir,
            keys,
            data_type,
            source,
            csv,
            Duration::from_secs(interval_secs),
            Duration::from_secs(duration_secs),
        ),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&cli.cache_dir),
            CacheAction::Get { key, data_type } => run_cache_get(&config, &cli.cache_dir, &key, data_type),
            CacheAction::Clear { confirm } => run_cache_clear(&cli.cache_dir, confirm),
        },
        Commands::Config => {
            print!("{}", config.to_toml().context("serialize config")?);
            Ok(())
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("load config from {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

fn primary_source(config: &SyncConfig, kind: PrimarySource) -> Result<Arc<dyn DataSource>> {
    let source: Arc<dyn DataSource> = match kind {
        PrimarySource::Http => {
            let Some(http) = &config.sources.http else {
                bail!("--source http needs a [sources.http] section in the config file");
            };
            Arc::new(HttpSource::new("http", http).context("build HTTP source")?)
        }
        PrimarySource::Synthetic => Arc::new(SyntheticSource::new(42)),
    };
    Ok(source)
}

fn fallback_source(config: &SyncConfig, csv: Option<PathBuf>) -> Result<Option<Arc<dyn DataSource>>> {
    let Some(path) = csv.or_else(|| config.sources.csv_path.clone()) else {
        return Ok(None);
    };
    let source: Arc<dyn DataSource> = Arc::new(
        CsvSource::from_path(&path)
            .with_context(|| format!("load CSV fallback from {}", path.display()))?,
    );
    Ok(Some(source))
}

/// Prints one line per finished key.
struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}

    fn on_key(&self, key: &str, error: Option<&str>) {
        match error {
            None => println!("  ok    {key}"),
            Some(e) => println!("  FAIL  {key}: {e}"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_fetch(
    config: &SyncConfig,
    cache_dir: &Path,
    keys: Vec<String>,
    data_type: DataType,
    source: PrimarySource,
    csv: Option<PathBuf>,
    missing_only: bool,
    print: bool,
) -> Result<()> {
    let core = SyncCore::open(config.clone(), cache_dir)
        .with_context(|| format!("open cache at {}", cache_dir.display()))?;
    let primary = primary_source(config, source)?;
    let fallback = fallback_source(config, csv)?;

    let fetcher = core.fetcher();
    let result = if missing_only {
        fetcher.fetch_missing(&keys, data_type, primary.as_ref(), fallback.as_deref())
    } else if fallback.is_some() {
        fetcher.fetch_batch_with_fallback(&keys, data_type, primary.as_ref(), fallback.as_deref())
    } else {
        fetcher.fetch_batch(&keys, data_type, primary.as_ref(), Some(&StdoutProgress))
    };

    println!(
        "Fetched {}/{} keys in {} ms ({} from cache, {} from fallback)",
        result.succeeded,
        result.total,
        result.duration_ms,
        result.cache_hits,
        result.fallback_used.len()
    );
    let errors: BTreeMap<_, _> = result.errors.iter().collect();
    for (key, err) in &errors {
        eprintln!("Error for {key}: {err}");
    }
    if print {
        let ordered: BTreeMap<_, _> = result.results.iter().collect();
        println!("{}", serde_json::to_string_pretty(&ordered)?);
    }

    if !result.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_serve(
    config: &SyncConfig,
    cache_dir: &Path,
    keys: Vec<String>,
    data_type: DataType,
    source: PrimarySource,
    csv: Option<PathBuf>,
    interval: Duration,
    duration: Duration,
) -> Result<()> {
    if interval.is_zero() {
        bail!("--interval-secs must be at least 1");
    }
    let core = SyncCore::open(config.clone(), cache_dir)
        .with_context(|| format!("open cache at {}", cache_dir.display()))?;
    let primary = primary_source(config, source)?;
    let fallback = fallback_source(config, csv)?;

    core.track(&format!("refresh_{data_type}"), 10, interval, keys, data_type, primary, fallback)?;

    let report = core.start()?;
    println!(
        "Warmup: {}/{} tasks ok, {} items in {} ms",
        report.succeeded, report.total, report.items, report.duration_ms
    );
    for r in report.results.iter().filter(|r| !r.success) {
        eprintln!("Warmup task {} failed: {}", r.name, r.error.as_deref().unwrap_or("unknown"));
    }

    info!(?duration, "serving");
    std::thread::sleep(duration);

    if !core.shutdown() {
        warn!("scheduler did not stop within its timeout");
    }
    for task in core.scheduler().status() {
        println!(
            "{:<24} runs={:<5} errors={:<5} last_items={:<6} next_run={}",
            task.name,
            task.run_count,
            task.error_count,
            task.last_items.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            task.next_run.format("%Y-%m-%d %H:%M:%S")
        );
    }
    let stats = core.cache().stats();
    println!(
        "Cache: {} entries (max {}), hit rate {:.1}%, {} evictions, {} durable write failures",
        stats.size,
        stats.max_size,
        stats.hit_rate() * 100.0,
        stats.evictions,
        stats.durable_write_failures
    );
    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }
    let store = FileStore::open(cache_dir)?;
    let records = store.records()?;
    if records.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }

    let now = Utc::now();
    let mut counts: BTreeMap<DataType, (usize, usize)> = BTreeMap::new();
    for record in &records {
        let (fresh, stale) = counts.entry(record.data_type).or_default();
        if record.is_fresh(now) {
            *fresh += 1;
        } else {
            *stale += 1;
        }
    }

    println!("Cache: {}", cache_dir.display());
    println!("Records: {}", records.len());
    println!();
    println!("{:<14} {:>8} {:>8}", "Data type", "Fresh", "Stale");
    println!("{}", "-".repeat(32));
    for (data_type, (fresh, stale)) in &counts {
        println!("{:<14} {:>8} {:>8}", data_type.as_str(), fresh, stale);
    }
    Ok(())
}

fn run_cache_get(config: &SyncConfig, cache_dir: &Path, key: &str, data_type: DataType) -> Result<()> {
    let core = SyncCore::open(config.clone(), cache_dir)?;
    match core.cache().get_entry(key, data_type) {
        Some(entry) => {
            println!("{}", serde_json::to_string_pretty(&entry.value)?);
            eprintln!("expires {}", entry.expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
            Ok(())
        }
        None => bail!("no fresh {data_type} entry for '{key}'"),
    }
}

fn run_cache_clear(cache_dir: &Path, confirm: bool) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }
    let store = FileStore::open(cache_dir)?;
    if !confirm {
        let count = store.records()?.len();
        println!("Would remove {count} records. Pass --confirm to delete.");
        return Ok(());
    }
    let removed = store.clear()?;
    println!("Removed {removed} records from {}", cache_dir.display());
    Ok(())
}
