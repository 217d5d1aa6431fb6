//! Roster-Harvest main entry point
//!
//! This is the command-line interface for the Roster-Harvest entity crawler.

use anyhow::{bail, Context};
use clap::Parser;
use roster_harvest::config::{load_config_with_hash, Config};
use roster_harvest::crawler::{CrawlReport, CrawlService};
use roster_harvest::output::{load_status, print_run, print_status};
use roster_harvest::state::read_checkpoint;
use roster_harvest::storage::{open_ledger, RunLedger};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Number of runs listed by --history
const HISTORY_LIMIT: usize = 20;

/// Roster-Harvest: a resumable, quota-aware entity crawler
///
/// Enumerates every user of a GitHub-compatible API, fetches each profile,
/// and writes the results as immutable batch files. Interrupted crawls
/// resume from the last checkpoint.
#[derive(Parser, Debug)]
#[command(name = "roster-harvest")]
#[command(version)]
#[command(about = "A resumable, quota-aware entity crawler", long_about = None)]
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

    /// Provider credential, overriding the one in the config file
    #[arg(long, env = "HARVESTER_CREDENTIAL", hide_env_values = true)]
    credential: Option<String>,

    /// Validate config and show the resume point without crawling
    #[arg(long, conflicts_with_all = ["status", "history"])]
    dry_run: bool,

    /// Show durable crawl status and exit
    #[arg(long, conflicts_with_all = ["dry_run", "history"])]
    status: bool,

    /// Emit --status as JSON
    #[arg(long, requires = "status")]
    json: bool,

    /// Show the run history and exit
    #[arg(long, conflicts_with_all = ["dry_run", "status"])]
    history: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config, cli.credential.clone())
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, &config_hash);
    } else if cli.status {
        handle_status(&config, cli.json)?;
    } else if cli.history {
        handle_history(&config)?;
    } else {
        handle_crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("roster_harvest=info,warn"),
            1 => EnvFilter::new("roster_harvest=debug,info"),
            2 => EnvFilter::new("roster_harvest=trace,debug"),
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

/// Handles the --dry-run mode: shows effective settings and the resume point
fn handle_dry_run(config: &Config, config_hash: &str) {
    println!("=== Roster-Harvest Dry Run ===\n");

    println!("Provider:");
    println!("  Base URL: {}", config.api.base_url);
    println!("  User agent: {}", config.api.user_agent);
    println!("  Request timeout: {}s", config.api.request_timeout);
    println!("  Credential: {}", redact(&config.api.credential));

    println!("\nCrawler:");
    println!("  Page size: {}", config.crawler.per_page);
    println!("  Pacing delay: {}ms", config.crawler.pacing_delay);
    println!("  Max page retries: {}", config.crawler.max_page_retries);

    println!("\nOutput:");
    println!("  Checkpoint: {}", config.output.checkpoint_path);
    println!("  Data dir: {}", config.output.data_dir);
    println!("  Failures dir: {}", config.output.failure_dir().display());
    println!("  Ledger: {}", config.output.ledger_path);
    println!("  Batch threshold: {}", config.output.batch_threshold);
    println!("  Error batch threshold: {}", config.output.error_batch_threshold);

    let checkpoint = read_checkpoint(Path::new(&config.output.checkpoint_path));
    println!("\n✓ Configuration is valid (hash: {})", config_hash);
    println!(
        "✓ Would resume from since={} with totalFetched={}",
        checkpoint.cursor, checkpoint.total_fetched
    );
}

/// Masks a credential for display; short ones are hidden entirely
fn redact(credential: &str) -> String {
    if credential.chars().count() <= 8 {
        return "********".to_string();
    }
    let visible: String = credential.chars().take(4).collect();
    format!("{}…", visible)
}

/// Handles the --status mode
fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let status = load_status(config).context("Failed to load crawl status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

/// Handles the --history mode
fn handle_history(config: &Config) -> anyhow::Result<()> {
    let ledger_path = Path::new(&config.output.ledger_path);
    if !ledger_path.exists() {
        println!("No runs recorded yet");
        return Ok(());
    }

    let ledger = open_ledger(ledger_path)
        .with_context(|| format!("Failed to open ledger {}", ledger_path.display()))?;
    let runs = ledger.list_runs(HISTORY_LIMIT)?;

    println!("=== Run History ({}) ===\n", runs.len());
    for run in &runs {
        print_run(run);
        println!();
    }
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let service = CrawlService::new(config)?;
    service.start().context("Failed to start crawl")?;

    let stop = service.stop_signal();
    let finished = service.wait();
    tokio::pin!(finished);

    let outcome = tokio::select! {
        outcome = &mut finished => outcome,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            }
            tracing::info!("Interrupt received, stopping after the current page");
            if let Some(stop) = &stop {
                stop.stop();
            }
            finished.await
        }
    };

    match outcome {
        Some(Ok(report)) => {
            print_report(&report);
            Ok(())
        }
        Some(Err(e)) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e).context("Crawl stopped in FAILED; rerun to resume from the last checkpoint")
        }
        None => bail!("Crawl task was not started"),
    }
}

fn print_report(report: &CrawlReport) {
    println!("=== Crawl {} ===\n", if report.stopped { "Stopped" } else { "Complete" });
    println!("  Run: {}", report.run_id);
    println!(
        "  Cursor: {} -> {}",
        report.start.cursor, report.checkpoint.cursor
    );
    println!("  Total fetched: {}", report.checkpoint.total_fetched);
    println!(
        "  Pages: {}, records: {}, failures: {}",
        report.pages, report.records, report.failures
    );
    println!("  Requests: {}", report.requests_made);
    println!(
        "  Throttled: {} time(s), {:.1}s",
        report.throttle_waits.len(),
        report.total_throttle_wait().as_secs_f64()
    );
    println!("  Units written: {}", report.units.len());
    for unit in &report.units {
        println!("    - {} ({} entries)", unit.name, unit.count);
    }
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());
}
