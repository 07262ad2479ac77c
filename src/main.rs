// ABOUTME: CLI entry point for knowledge-sync
// ABOUTME: Watches a knowledge table, or prints status / forces one sync and exits

use anyhow::{bail, Context};
use clap::Parser;
use knowledge_sync::store::{KnowledgeStore, SqliteStore};
use knowledge_sync::sync::{FingerprintCache, SourceWatcher, SyncEngine};
use knowledge_sync::SyncConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "knowledge-sync")]
#[command(
    about = "Keep a knowledge store in sync with an externally edited knowledge table",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Path to the knowledge table (CSV, or JSON by extension)
    #[arg(long, env = "KNOWLEDGE_SYNC_SOURCE")]
    source: Option<PathBuf>,
    /// Seconds between modification-time polls
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=86_400))]
    interval: Option<u64>,
    /// Print watcher status and exit
    #[arg(long, conflicts_with = "force_sync")]
    status: bool,
    /// Run one sync cycle and exit
    #[arg(long)]
    force_sync: bool,
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Knowledge store location (default: beside the table)
    #[arg(long)]
    store: Option<PathBuf>,
    /// Fingerprint cache location (default: beside the table)
    #[arg(long)]
    cache: Option<PathBuf>,
    /// Change ratio above which the store is fully rebuilt
    #[arg(long)]
    threshold: Option<f64>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

/// Exit code for a forced sync whose rebuild the store rejected.
const EXIT_STORE_FAILURE: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = build_config(&cli)?;
    let source = config.source_path()?.to_path_buf();
    if !source.is_file() {
        bail!("Source table {} not found", source.display());
    }

    if cli.status {
        return print_status(&config);
    }

    let store_path = config.store_path()?;
    let store = SqliteStore::open(&store_path)?;
    let engine = SyncEngine::from_config(&config, store)?;
    let mut watcher = SourceWatcher::new(engine, config.poll_interval());

    if cli.force_sync {
        match watcher.force_sync() {
            Ok(report) => {
                println!("{}", report);
                return Ok(());
            }
            Err(e) if e.is_precondition() => return Err(e.into()),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(EXIT_STORE_FAILURE);
            }
        }
    }

    watcher.start()?;
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, stopping watcher after the current cycle");

    let status = tokio::task::spawn_blocking(move || {
        watcher.stop();
        watcher.status()
    })
    .await
    .context("Watcher shutdown task failed")?;
    tracing::info!(
        "Watcher stopped after {} cycles ({} rows synced)",
        status.cycles,
        status.row_count
    );
    Ok(())
}

fn build_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(source) = &cli.source {
        config.source = Some(source.clone());
    }
    if let Some(interval) = cli.interval {
        config.poll_interval_secs = interval;
    }
    if let Some(threshold) = cli.threshold {
        config.change_threshold = threshold;
    }
    if let Some(store) = &cli.store {
        config.store_path = Some(store.clone());
    }
    if let Some(cache) = &cli.cache {
        config.cache_path = Some(cache.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Report the persisted sync state without creating or modifying any file.
fn print_status(config: &SyncConfig) -> anyhow::Result<()> {
    let source = config.source_path()?;
    let store_path = config.store_path()?;
    let cache_path = config.cache_path()?;

    println!("Source:      {}", source.display());
    if store_path.is_file() {
        let rows = SqliteStore::open_read_only(&store_path)?
            .get_statistics()?
            .row_count;
        println!("Store:       {} ({} rows)", store_path.display(), rows);
    } else {
        println!("Store:       {} (not created)", store_path.display());
    }
    println!("Cache:       {}", cache_path.display());

    let loaded = FingerprintCache::load_or_reset(&cache_path);
    println!("Watcher:     stopped");
    match loaded.cache.synced_at {
        Some(at) => println!("Last sync:   {}", at.to_rfc3339()),
        None => println!("Last sync:   never"),
    }
    println!("Rows synced: {}", loaded.cache.len());
    if loaded.was_reset {
        println!("Note:        fingerprint cache is corrupt and will be rebuilt on the next sync");
    }
    Ok(())
}
