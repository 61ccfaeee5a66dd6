//! CLI command definitions for parascan.
//!
//! `scan` runs a target list through the worker pool, `resume` finishes the
//! incomplete rows of an earlier run and `status` reports store counts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::config::ScanConfig;
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{load_targets, parse_targets, run_parallel_scan, ScanInput, ScanOutcome};
use crate::session::HttpProbeFactory;
use crate::storage::{ScanStore, StoreCounts};

/// Parallel scanner with isolated workers and a single database writer.
#[derive(Parser)]
#[command(name = "parascan")]
#[command(about = "Scan many targets in parallel with isolated workers")]
#[command(version)]
#[command(
    long_about = "parascan fans a target list out to a bounded pool of isolated workers.\n\nResults are written to a SQLite store by a single writer, so an interrupted run can be resumed.\n\nExample usage:\n  parascan scan targets.txt --workers 4 --output ./scan-output\n  parascan resume --output ./scan-output"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Scan every target in a file (or given with --url).
    Scan(ScanArgs),

    /// Finish the incomplete targets of an earlier run.
    Resume(ResumeArgs),

    /// Show result counts from a scan store.
    Status(StatusArgs),
}

/// Options shared by `scan` and `resume`.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// YAML configuration file. Flags override its values.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Number of workers (default: two per CPU core, capped by memory).
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Output directory for the database, logs and failed-target files.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Database path (default: <output>/parascan.db).
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Page load timeout in seconds.
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Retry cap for every error class.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Accept invalid TLS certificates.
    #[arg(long)]
    pub insecure: bool,

    /// Start all workers at once.
    #[arg(long)]
    pub no_stagger: bool,

    /// Write the Prometheus metrics text to this file when the run ends.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Output the outcome as JSON instead of the summary block.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `parascan scan`.
#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// File with one target per line.
    #[arg(required_unless_present = "url")]
    pub targets: Option<PathBuf>,

    /// Scan a single target instead of a file.
    #[arg(short = 'u', long, conflicts_with = "targets")]
    pub url: Option<String>,

    /// Also scan https:// for targets given without a scheme.
    #[arg(long)]
    pub https: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Arguments for `parascan resume`.
#[derive(Parser, Debug)]
pub struct ResumeArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Arguments for `parascan status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output directory of the run.
    #[arg(short = 'o', long, default_value = "parascan_output")]
    pub output: PathBuf,

    /// Database path (default: <output>/parascan.db).
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Output counts as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics registry unavailable");
    }

    match cli.command {
        Commands::Scan(args) => run_scan_command(args).await,
        Commands::Resume(args) => run_resume_command(args).await,
        Commands::Status(args) => run_status_command(args).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_scan_command(args: ScanArgs) -> anyhow::Result<()> {
    let mut config = build_config(&args.run)?;
    if args.https {
        config.prepend_https = true;
    }
    config.validate()?;

    let jobs = match (&args.targets, &args.url) {
        (_, Some(url)) => parse_targets(url, config.prepend_https),
        (Some(path), None) => load_targets(path, config.prepend_https)?,
        (None, None) => anyhow::bail!("Either a target file or --url is required"),
    };
    if jobs.is_empty() {
        anyhow::bail!("No targets to scan");
    }

    let outcome = run_parallel_scan(
        &config,
        ScanInput::Targets(jobs),
        Arc::new(HttpProbeFactory::new()),
    )
    .await?;
    report_outcome(&args.run, &outcome)
}

async fn run_resume_command(args: ResumeArgs) -> anyhow::Result<()> {
    let config = build_config(&args.run)?;
    config.validate()?;

    let db_path = config.db_path();
    if !db_path.exists() {
        anyhow::bail!("No scan store at {}; nothing to resume", db_path.display());
    }

    let outcome = run_parallel_scan(
        &config,
        ScanInput::Resume,
        Arc::new(HttpProbeFactory::new()),
    )
    .await?;
    report_outcome(&args.run, &outcome)
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    db_path: PathBuf,
    #[serde(flatten)]
    counts: StoreCounts,
    incomplete: u64,
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| args.output.join(crate::config::DEFAULT_DB_NAME));
    if !db_path.exists() {
        anyhow::bail!("No scan store at {}", db_path.display());
    }

    let store = ScanStore::open(&db_path, 1)
        .await
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    let counts = store.counts().await?;
    store.checkpoint_and_close().await?;

    let output = StatusOutput {
        db_path,
        counts,
        incomplete: counts.incomplete(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Store:      {}", output.db_path.display());
        println!("Targets:    {}", counts.total);
        println!("Complete:   {}", counts.complete);
        println!("Succeeded:  {}", counts.succeeded);
        println!("Failed:     {}", counts.failed);
        println!("Incomplete: {}", output.incomplete);
    }
    Ok(())
}

/// Builds the run configuration: defaults, YAML file, environment, then flags.
fn build_config(args: &RunArgs) -> anyhow::Result<ScanConfig> {
    let base = match &args.config {
        Some(path) => ScanConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ScanConfig::default(),
    };
    let mut config = base.apply_env()?;

    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(db) = &args.db {
        config.db_path = Some(db.clone());
    }
    if let Some(timeout) = args.timeout {
        config.page_timeout_secs = timeout;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if args.insecure {
        config.accept_invalid_certs = true;
    }
    if args.no_stagger {
        config.stagger = false;
    }
    if args.json {
        config.print_summary = false;
    }
    Ok(config)
}

fn report_outcome(args: &RunArgs, outcome: &ScanOutcome) -> anyhow::Result<()> {
    if let Some(path) = &args.metrics_file {
        write_metrics_file(path)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else if outcome.interrupted {
        println!(
            "\nInterrupted with {} targets left. Resume with: parascan resume --output {}",
            outcome.counts.incomplete(),
            outcome
                .db_path
                .parent()
                .map(Path::display)
                .map(|d| d.to_string())
                .unwrap_or_else(|| ".".to_string())
        );
    }
    if let Some(path) = &outcome.failed_targets_path {
        info!(path = %path.display(), "Retry failed targets with: parascan scan <file>");
    }
    Ok(())
}

fn write_metrics_file(path: &Path) -> anyhow::Result<()> {
    let text = export_metrics();
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    info!(path = %path.display(), "Metrics written");
    Ok(())
}
