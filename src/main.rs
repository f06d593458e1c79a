//! Shiori main entry point
//!
//! This is the command-line interface for the Shiori crawl orchestrator.

use clap::Parser;
use shiori::crawler::CrawlSession;
use shiori::output::{print_failures, print_report, print_work_stats, WorkStatsLine};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// How many outstanding item numbers a dry run lists per work
const DRY_RUN_ITEM_LIMIT: usize = 15;

/// Shiori: a convergent crawl orchestrator
///
/// Shiori crawls chaptered works through a health-scored proxy pool,
/// journals every outcome, and keeps retrying failures through batch and
/// cyclic recovery until the crawl converges. Re-running it only fetches
/// what is still missing.
#[derive(Parser, Debug)]
#[command(name = "shiori")]
#[command(version = "0.4.0")]
#[command(about = "A convergent crawl orchestrator", long_about = None)]
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

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "failures", "retry_failed", "refresh_proxies"])]
    dry_run: bool,

    /// Show journal statistics and exit
    #[arg(long, conflicts_with_all = ["dry_run", "failures", "retry_failed", "refresh_proxies"])]
    stats: bool,

    /// List the current failure journals and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "retry_failed", "refresh_proxies"])]
    failures: bool,

    /// Re-crawl only the items in the failed-references ledger
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "failures", "refresh_proxies"])]
    retry_failed: bool,

    /// Drop the cached proxy pool and fetch a fresh list, then exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "failures", "retry_failed"])]
    refresh_proxies: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, _config_hash) = match shiori::config::load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(config).await?;
    } else if cli.stats {
        handle_stats(config)?;
    } else if cli.failures {
        handle_failures(config)?;
    } else if cli.retry_failed {
        handle_retry_failed(config).await?;
    } else if cli.refresh_proxies {
        handle_refresh_proxies(config).await?;
    } else {
        handle_crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shiori=info,warn"),
            1 => EnvFilter::new("shiori=debug,info"),
            2 => EnvFilter::new("shiori=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be crawled
async fn handle_dry_run(config: shiori::config::Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Shiori Dry Run ===\n");

    println!("Crawl Configuration:");
    println!("  Item concurrency: {}", config.crawl.item_concurrency);
    println!("  Unit concurrency: {}", config.crawl.unit_concurrency);
    println!("  Item attempts: {}", config.crawl.item_attempts);
    println!("  Max recovery cycles: {}", config.crawl.max_recovery_cycles);

    println!("\nTimeouts:");
    println!("  Page fetch: {}ms", config.timeouts.page_fetch);
    println!("  Unit download: {}ms", config.timeouts.unit_download);
    println!("  Provider call: {}ms", config.timeouts.provider_call);
    println!("  Ceiling: {}ms", config.timeouts.max_timeout);

    println!("\nProxy Pool:");
    println!("  Source: {}", config.proxy.source_url);
    println!("  Source attempts: {}", config.proxy.source_attempts);
    println!("  Cache TTL: {}s", config.proxy.cache_ttl);

    println!("\nStorage:");
    println!("  Journals: {}", config.storage.journal_dir);
    println!("  Cache: {}", config.storage.cache_path);
    println!("  Output: {}", config.storage.output_dir);

    println!("\nScrape Service:");
    println!("  Endpoint: {}", config.fetcher.endpoint);

    let session = CrawlSession::new(config)?;
    let plans = session.plan().await?;

    println!("\nWorks ({}):", plans.len());
    let mut would_crawl = 0;
    for plan in &plans {
        match &plan.error {
            Some(error) => {
                println!("  - {}: cannot enumerate ({})", plan.name, error);
            }
            None => {
                println!(
                    "  - {} ({} of {} items outstanding)",
                    plan.name,
                    plan.outstanding.len(),
                    plan.total_items
                );
                for number in plan.outstanding.iter().take(DRY_RUN_ITEM_LIMIT) {
                    println!("    * #{}", number);
                }
                if plan.outstanding.len() > DRY_RUN_ITEM_LIMIT {
                    println!(
                        "    * ... and {} more",
                        plan.outstanding.len() - DRY_RUN_ITEM_LIMIT
                    );
                }
                would_crawl += plan.outstanding.len();
            }
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would crawl {} items across {} works",
        would_crawl,
        plans.len()
    );

    Ok(())
}

/// Handles the --stats mode: shows journal statistics
fn handle_stats(config: shiori::config::Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Journals: {}\n", config.storage.journal_dir);

    let session = CrawlSession::new(config)?;
    let log = session.log();

    let mut lines = Vec::new();
    for work in log.works()? {
        let stats = log.stats(&work)?;
        let latest_item = log.latest_success(&work)?.map(|record| record.number);
        lines.push(WorkStatsLine {
            work,
            success_count: stats.success_count,
            failure_count: stats.failure_count,
            latest_item,
        });
    }

    print_work_stats(&lines);
    Ok(())
}

/// Handles the --failures mode: lists the failure journals
fn handle_failures(config: shiori::config::Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Journals: {}\n", config.storage.journal_dir);

    let session = CrawlSession::new(config)?;
    let failures = session.log().all_failures()?;
    print_failures(&failures);
    Ok(())
}

/// Handles the --retry-failed mode: re-crawls the failed-references ledger
async fn handle_retry_failed(
    config: shiori::config::Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = CrawlSession::new(config)?;
    match session.run_retry_failed().await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Retry run failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the --refresh-proxies mode: re-fetches the proxy list
async fn handle_refresh_proxies(
    config: shiori::config::Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = CrawlSession::new(config)?;
    session.clear_proxy_cache().await;

    match session.refresh_proxies().await {
        Ok(count) => {
            println!("✓ Fetched {} proxies", count);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Proxy refresh failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the main crawl operation
async fn handle_crawl(config: shiori::config::Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Works: {}, scrape endpoint: {}",
        config.works.len(),
        config.fetcher.endpoint
    );

    let session = CrawlSession::new(config)?;
    match session.run().await {
        Ok(report) => {
            if !report.converged() {
                tracing::warn!(
                    "Crawl finished with {} persistent failures",
                    report.persistent_failures.len()
                );
            }
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
