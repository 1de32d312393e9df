//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest fetch scheduler.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_harvest::config::{load_config_with_hash, Config};
use sumi_harvest::crawler::{restore_pool_exclusions, CrawlScheduler, FetchTask, HttpFetcher, StorageSink};
use sumi_harvest::output::{print_report, write_markdown_report};
use sumi_harvest::storage::{SqliteStorage, StateStore, Storage};
use sumi_harvest::{BackoffController, DuplicateDetector, ResourceKind, ResourcePool};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: an abuse-aware bulk fetch scheduler
///
/// Sumi-Harvest fetches a list of URLs with a bounded worker pool, rotating
/// proxies and client identities, tagging duplicate content, and adapting
/// the pace of each domain to how it responds.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "An abuse-aware bulk fetch scheduler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start fresh, discarding saved duplicate, pacing and exclusion state
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be fetched without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_crawl(config, &config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be fetched
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Sumi-Harvest Dry Run ===\n");

    let scheduler = &config.scheduler;
    println!("Scheduler Configuration:");
    println!("  Concurrency: {}", scheduler.concurrency);
    println!("  Max retries: {}", scheduler.max_retries);
    println!("  Base retry delay: {}ms", scheduler.base_delay_ms);
    println!("  Fetch timeout: {}ms", scheduler.fetch_timeout_ms);
    println!(
        "  Cooldowns: egress {}s, identity {}s",
        scheduler.egress_cooldown_secs, scheduler.identity_cooldown_secs
    );
    println!(
        "  Domain block window: {}s",
        scheduler.domain_block_window_secs
    );

    println!("\nEgress Routes ({}):", config.resources.egress.len());
    for egress in &config.resources.egress {
        println!("  - {}", egress);
    }
    println!("Identities: {}", config.resources.identities.len());
    println!(
        "Persist exclusions: {}",
        config.resources.persist_exclusions
    );

    println!("\nDuplicate Detection:");
    println!("  Scan window: {}", config.dedup.scan_window);
    println!(
        "  Similarity threshold: {}",
        config.dedup.similarity_threshold
    );
    println!("  Shingle size: {}", config.dedup.shingle_size);

    println!("\nPacing:");
    println!("  Policy: {:?}", config.backoff.policy);
    println!(
        "  Multiplier bounds: [{}, {}]",
        config.backoff.min_multiplier, config.backoff.max_multiplier
    );
    println!("  Batch size: {}", config.backoff.batch_size);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    if let Some(report_path) = &config.output.report_path {
        println!("  Report: {}", report_path);
    }

    println!("\nTasks ({}):", config.tasks.len());
    let mut tasks: Vec<_> = config.tasks.iter().collect();
    tasks.sort_by_key(|t| t.priority);
    for task in tasks {
        println!("  - [{}] {}", task.priority, task.url);
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use sumi_harvest::output::{load_statistics, print_statistics};

    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))
        .context("failed to open database")?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main fetch run
async fn handle_crawl(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    let storage = Arc::new(
        SqliteStorage::new(Path::new(&config.output.database_path))
            .with_context(|| format!("failed to open database {}", config.output.database_path))?,
    );
    let run_id = storage.create_run(config_hash)?;
    tracing::info!("Created run {}", run_id);

    let identities = Arc::new(ResourcePool::new(
        ResourceKind::Identity,
        config.resources.identities.iter().cloned(),
    ));
    let egress = Arc::new(ResourcePool::new(
        ResourceKind::Egress,
        config.resources.egress.iter().cloned(),
    ));

    let detector = if fresh {
        tracing::info!("Starting fresh (discarding saved state)");
        storage.clear_state()?;
        DuplicateDetector::new(&config.dedup)
    } else {
        restore_state(&config, storage.as_ref(), &identities, &egress)?
    };

    let backoff = BackoffController::new(config.backoff.clone()).with_store(storage.clone());

    let scheduler = CrawlScheduler::new(
        config.scheduler.clone(),
        identities,
        egress,
        Arc::new(detector),
        Arc::new(backoff),
    )
    .with_store(storage.clone())
    .persist_exclusions(config.resources.persist_exclusions);

    for entry in &config.tasks {
        // validation already checked every URL
        match FetchTask::new(&entry.url, entry.priority) {
            Ok(task) => {
                scheduler.enqueue(task);
            }
            Err(e) => tracing::warn!("Skipping task {}: {}", entry.url, e),
        }
    }
    tracing::info!("Queued {} tasks", scheduler.pending());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing in-flight fetches");
                cancel.cancel();
            }
        });
    }

    let fetcher = Arc::new(HttpFetcher::new(config.scheduler.fetch_timeout()));
    let sink = Arc::new(StorageSink::new(storage.clone(), run_id));
    let report = scheduler.run(fetcher, sink, cancel).await;

    storage.record_failures(run_id, &report.failures())?;
    storage.finish_run(run_id, report.status)?;

    print_report(&report);

    if let Some(report_path) = &config.output.report_path {
        write_markdown_report(&report, run_id, Path::new(report_path))
            .with_context(|| format!("failed to write report to {}", report_path))?;
        println!("\n✓ Report written to: {}", report_path);
    }

    Ok(())
}

/// Loads the duplicate detector and pool exclusions saved by earlier runs
fn restore_state(
    config: &Config,
    storage: &SqliteStorage,
    identities: &ResourcePool,
    egress: &ResourcePool,
) -> anyhow::Result<DuplicateDetector> {
    let detector = match storage.load_detector()? {
        Some(snapshot) => {
            tracing::info!(
                "Restored duplicate index ({} hashes, {} recent records)",
                snapshot.exact.len(),
                snapshot.recent.len()
            );
            DuplicateDetector::from_snapshot(&config.dedup, snapshot)
        }
        None => DuplicateDetector::new(&config.dedup),
    };

    if config.resources.persist_exclusions {
        for pool in [identities, egress] {
            let restored = restore_pool_exclusions(pool, storage)?;
            if restored > 0 {
                tracing::info!("Restored {} {} exclusions", restored, pool.kind());
            }
        }
    }

    Ok(detector)
}
