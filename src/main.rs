//! Stacks-Harvest main entry point
//!
//! This is the command-line interface for the Stacks-Harvest catalog harvester.

use clap::{Parser, Subcommand};
use stacks_harvest::config::{load_config_with_hash, Config};
use stacks_harvest::crawler::{run_crawl, StageHandlers};
use stacks_harvest::output::print_statistics;
use stacks_harvest::storage::{CheckpointStore, SqliteCheckpointStore};
use stacks_harvest::validator::{read_records, validate_records};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Stacks-Harvest: an order-preserving digital library catalog harvester
///
/// Stacks-Harvest walks a paginated library catalog, resolves every record's
/// detail page and reader metadata, and writes one merged record per catalog
/// entry. The `validate` subcommand checks a finished record stream for
/// broken sub-resource and reader references.
#[derive(Parser, Debug)]
#[command(name = "stacks-harvest")]
#[command(version)]
#[command(about = "An order-preserving digital library catalog harvester", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the catalog (resumes an interrupted run by default)
    Crawl {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Start a fresh crawl, ignoring previous state
        #[arg(long)]
        fresh: bool,
    },

    /// Validate config and show what would be crawled without crawling
    Check {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Check a record stream on stdin for broken references
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Crawl { config, fresh } => {
            let (config, hash) = load(&config)?;
            handle_crawl(config, &hash, fresh).await?;
        }
        Command::Check { config } => {
            let (config, _hash) = load(&config)?;
            handle_check(&config)?;
        }
        Command::Validate => handle_validate()?,
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr so that stdout carries only command output.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
            0 => EnvFilter::new("stacks_harvest=info,warn"),
            1 => EnvFilter::new("stacks_harvest=debug,info"),
            2 => EnvFilter::new("stacks_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        })
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn load(path: &Path) -> Result<(Config, String), Box<dyn std::error::Error>> {
    tracing::info!("Loading configuration from: {}", path.display());
    match load_config_with_hash(path) {
        Ok((config, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            Ok((config, hash))
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the check mode: validates config and shows what would be crawled
fn handle_check(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Stacks-Harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!(
        "  Max concurrent fetches: {}",
        config.crawler.max_concurrent_fetches
    );
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);
    println!(
        "  Retries: {} ({}ms apart)",
        config.crawler.max_retries, config.crawler.retry_delay_ms
    );
    println!(
        "  Checkpoint every {} completions",
        config.crawler.checkpoint_interval
    );

    println!("\nOrigin:");
    println!("  Base URL: {}", config.origin.base_url);
    println!("  User agent: {}", config.origin.user_agent);
    println!(
        "  Session cookie: {}",
        if config.origin.cookie.is_some() {
            "set"
        } else {
            "none"
        }
    );

    println!("\nCatalog:");
    println!("  Listing URL: {}", config.catalog.listing_url);
    println!("  Page size: {}", config.catalog.page_size);
    println!("  Detail URL: {}", config.detail.url_template);
    println!("  Reader fields: {}", config.detail.reader_field_keys.join(", "));

    let handlers = StageHandlers::from_config(config)?;
    let seeds = handlers.seed_items();
    println!("\nSeed Queries ({}):", seeds.len());
    for (entry, item) in config.catalog.seeds.iter().zip(&seeds) {
        let body = item
            .body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        println!("  - {}: POST {} {}", entry.name, item.target, body);
    }

    println!("\nOutput:");
    println!("  Records: {}", config.output.records_path);
    println!("  Checkpoints: {}", config.output.checkpoint_path);

    let checkpoint_path = Path::new(&config.output.checkpoint_path);
    if checkpoint_path.exists() {
        let store = SqliteCheckpointStore::new(checkpoint_path)?;
        if let Some(run) = store.latest_run()? {
            let checkpoint = store.load_checkpoint(run.id)?;
            println!(
                "  Latest run {}: {} ({} queued, {} in flight, {} finalized)",
                run.id,
                run.status.to_db_string(),
                checkpoint.frontier.len(),
                checkpoint.records.len(),
                checkpoint.finalized.len()
            );
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling with {} seed queries", seeds.len());

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: Config,
    config_hash: &str,
    fresh: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume if interrupted run exists)");
    }
    tracing::info!(
        "Seed queries: {}, page size: {}",
        config.catalog.seeds.len(),
        config.catalog.page_size
    );

    match run_crawl(config, config_hash, fresh).await {
        Ok(stats) => {
            tracing::info!("Crawl completed successfully");
            print_statistics(&stats);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the validate mode: reads records from stdin, reports on stdout/stderr
fn handle_validate() -> Result<(), Box<dyn std::error::Error>> {
    let records = read_records(BufReader::new(io::stdin().lock()))?;
    tracing::debug!("Validating {} records", records.len());

    let report = validate_records(&records);
    report.write(&mut io::stdout().lock(), &mut io::stderr().lock())?;
    if !report.is_clean() {
        tracing::debug!("{} broken references found", report.defects.len());
    }

    Ok(())
}
