//! CLI command definitions for hookline.
//!
//! `run` is the long-lived worker process; the remaining subcommands are
//! one-shot operator tools against the same store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::StoreError;
use crate::metrics::{export_metrics, init_metrics, MetricsReporter, QueueMetrics};
use crate::scheduler::{
    wait_for_signal, HttpPayloadHandler, NewJob, PoolSet, RunMode, ShutdownCoordinator,
    ShutdownOutcome, StaleJobReaper, DEFAULT_PRIORITY,
};
use crate::storage::postgres::DEFAULT_MAX_CONNECTIONS;
use crate::storage::{JobStore, PgJobStore};

/// Default number of dead letters listed.
const DEFAULT_DEAD_LETTER_LIMIT: usize = 20;

/// Connections kept on top of one per worker loop for the reporter and reaper.
const EXTRA_CONNECTIONS: u32 = 4;

/// Upper bound on the connection pool of `run`.
const MAX_RUN_CONNECTIONS: u32 = 100;

/// Trailing window `stats` measures throughput over.
const STATS_THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Persistent webhook job queue and worker pool.
#[derive(Parser)]
#[command(name = "hookline")]
#[command(about = "Persistent job queue and worker pools for webhook ingestion")]
#[command(version)]
#[command(
    long_about = "hookline stores incoming webhook payloads as jobs in PostgreSQL and processes them with pools of concurrent workers.\n\nJobs are retried with exponential backoff and dead-lettered once their attempts are exhausted.\n\nExample usage:\n  hookline migrate\n  hookline run --mode both\n  hookline enqueue --payload '{\"object\":\"instagram\"}'"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file. Environment variables override its values.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// PostgreSQL connection URL (overrides config and DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run worker pools, the metrics reporter and the stale-job reaper until signalled.
    Run(RunArgs),

    /// Enqueue one job.
    Enqueue(EnqueueArgs),

    /// Print one queue snapshot (throughput over the last minute).
    Stats(StatsArgs),

    /// List dead-lettered jobs.
    #[command(alias = "dlq")]
    DeadLetters(DeadLettersArgs),

    /// Enqueue a fresh job from a dead letter's payload.
    Replay(ReplayArgs),

    /// Reclaim jobs stuck in processing once.
    Reap,

    /// Create or update the database schema.
    Migrate,
}

/// Arguments for `hookline run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Which pools to run: standard, hot-path or both.
    #[arg(long, default_value_t = RunMode::Both)]
    pub mode: RunMode,

    /// Payload handler endpoint (overrides config and HOOKLINE_HANDLER_URL).
    #[arg(long)]
    pub handler_url: Option<String>,

    /// Apply schema migrations before starting.
    #[arg(long)]
    pub migrate: bool,
}

/// Arguments for `hookline enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Job payload as JSON.
    #[arg(short, long)]
    pub payload: String,

    /// Priority; lower values are claimed first.
    #[arg(long, default_value_t = DEFAULT_PRIORITY, allow_negative_numbers = true)]
    pub priority: i32,
}

/// Arguments for `hookline stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Print the Prometheus text exposition instead of JSON.
    #[arg(long)]
    pub prometheus: bool,
}

/// Arguments for `hookline dead-letters`.
#[derive(Parser, Debug)]
pub struct DeadLettersArgs {
    /// Maximum number of dead letters to print, most recent first.
    #[arg(short = 'n', long, default_value_t = DEFAULT_DEAD_LETTER_LIMIT)]
    pub limit: usize,
}

/// Arguments for `hookline replay`.
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Dead letter id.
    pub id: Uuid,
}

#[derive(Serialize)]
struct MigrateOutput {
    status: &'static str,
    applied: Vec<String>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows the caller to access CLI options (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// This is a convenience function that parses CLI args and runs the command.
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the hookline CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run(args) => run_workers_command(config, args).await,
        Commands::Enqueue(args) => run_enqueue_command(config, args).await,
        Commands::Stats(args) => run_stats_command(config, args).await,
        Commands::DeadLetters(args) => run_dead_letters_command(config, args).await,
        Commands::Replay(args) => run_replay_command(config, args).await,
        Commands::Reap => run_reap_command(config).await,
        Commands::Migrate => run_migrate_command(config).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let mut config = QueueConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }

    Ok(config)
}

/// Connects and pings, so an unreachable store fails the command up front.
async fn connect_store(config: &QueueConfig, max_connections: u32) -> anyhow::Result<PgJobStore> {
    let store = PgJobStore::connect_with(&config.database_url, max_connections)
        .await
        .context("Job store is unreachable")?;
    store.ping().await.context("Job store is unreachable")?;
    Ok(store)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json_output = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
    println!("{}", json_output);
    Ok(())
}

// ============================================================================
// Worker process
// ============================================================================

async fn run_workers_command(mut config: QueueConfig, args: RunArgs) -> anyhow::Result<()> {
    if let Some(url) = args.handler_url {
        config.handler_url = Some(url);
        config.validate().context("Invalid configuration")?;
    }
    let handler_url = config
        .require_handler_url()
        .context("A handler URL is required to run workers")?
        .to_string();

    let mut loops = 0;
    if args.mode.runs_standard() {
        loops += config.standard.worker_count;
    }
    if args.mode.runs_hot_path() {
        loops += config.hot_path.worker_count;
    }
    let max_connections = u32::try_from(loops)
        .unwrap_or(MAX_RUN_CONNECTIONS)
        .saturating_add(EXTRA_CONNECTIONS)
        .clamp(DEFAULT_MAX_CONNECTIONS, MAX_RUN_CONNECTIONS);

    let store = connect_store(&config, max_connections).await?;
    if args.migrate {
        let applied = store.run_migrations().await.context("Migration failed")?;
        info!(applied = applied.len(), "Schema up to date");
    }
    let store: Arc<dyn JobStore> = Arc::new(store);

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Prometheus metrics unavailable");
    }

    let handler = Arc::new(
        HttpPayloadHandler::new(handler_url.as_str(), config.job_timeout())
            .context("Failed to build payload handler")?,
    );

    info!(
        mode = %args.mode,
        handler_url = %handler_url,
        max_retries = config.max_retries,
        job_timeout_ms = config.job_timeout_ms,
        "Starting hookline workers"
    );

    let mut pools = PoolSet::new(args.mode, &config, Arc::clone(&store), handler);
    pools.start().context("Failed to start worker pools")?;

    let (stop_tx, stop_rx) = watch::channel(false);

    let mut reporter = MetricsReporter::new(Arc::clone(&store), config.metrics_interval());
    for active in pools.active_handles() {
        reporter = reporter.with_active_workers(active);
    }
    let reporter_handle = reporter.spawn(stop_rx.clone());

    let reaper_handle = StaleJobReaper::new(
        Arc::clone(&store),
        config.stale_job_timeout(),
        config.max_retries,
    )
    .spawn(stop_rx);

    if let Err(e) = wait_for_signal().await {
        error!(error = %e, "Failed to listen for shutdown signals, shutting down");
    } else {
        info!("Shutdown signal received");
    }

    let coordinator = ShutdownCoordinator::new(config.shutdown_grace());
    let outcome = pools.shutdown(&coordinator).await;

    let _ = stop_tx.send(true);
    for (name, handle) in [("reporter", reporter_handle), ("reaper", reaper_handle)] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    match outcome {
        ShutdownOutcome::Drained => info!("hookline stopped cleanly"),
        ShutdownOutcome::Forced { still_active } => warn!(
            still_active,
            "hookline stopped with jobs in flight; the reaper will reclaim them"
        ),
    }

    Ok(())
}

// ============================================================================
// Operator commands
// ============================================================================

async fn run_enqueue_command(config: QueueConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).context("--payload is not valid JSON")?;

    let store = connect_store(&config, DEFAULT_MAX_CONNECTIONS).await?;
    let job = store
        .enqueue(NewJob::new(payload).with_priority(args.priority))
        .await
        .context("Failed to enqueue job")?;

    info!(job_id = %job.id, priority = job.priority, "Job enqueued");
    print_json(&job)
}

async fn run_stats_command(config: QueueConfig, args: StatsArgs) -> anyhow::Result<()> {
    let store: Arc<dyn JobStore> = Arc::new(connect_store(&config, DEFAULT_MAX_CONNECTIONS).await?);
    let snapshot = MetricsReporter::new(store, config.metrics_interval())
        .window_snapshot(STATS_THROUGHPUT_WINDOW)
        .await
        .context("Failed to read queue statistics")?;

    if args.prometheus {
        init_metrics().context("Failed to initialise metrics")?;
        QueueMetrics::new().record_snapshot(&snapshot);
        print!("{}", export_metrics());
        return Ok(());
    }

    print_json(&snapshot)
}

async fn run_dead_letters_command(
    config: QueueConfig,
    args: DeadLettersArgs,
) -> anyhow::Result<()> {
    let store = connect_store(&config, DEFAULT_MAX_CONNECTIONS).await?;
    let dead_letters = store
        .list_dead_letters(args.limit)
        .await
        .context("Failed to list dead letters")?;

    if dead_letters.is_empty() {
        info!("No dead letters");
    }
    print_json(&dead_letters)
}

async fn run_replay_command(config: QueueConfig, args: ReplayArgs) -> anyhow::Result<()> {
    let store = connect_store(&config, DEFAULT_MAX_CONNECTIONS).await?;
    let job = match store.replay_dead_letter(args.id, chrono::Utc::now()).await {
        Ok(job) => job,
        Err(StoreError::DeadLetterNotFound(id)) => {
            anyhow::bail!("No dead letter with id {}", id)
        }
        Err(e) => return Err(e).context("Failed to replay dead letter"),
    };

    info!(dead_letter_id = %args.id, job_id = %job.id, "Dead letter replayed");
    print_json(&job)
}

async fn run_reap_command(config: QueueConfig) -> anyhow::Result<()> {
    let store: Arc<dyn JobStore> = Arc::new(connect_store(&config, DEFAULT_MAX_CONNECTIONS).await?);
    let report = StaleJobReaper::new(store, config.stale_job_timeout(), config.max_retries)
        .sweep_once()
        .await
        .context("Reaper sweep failed")?;

    info!(
        requeued = report.requeued.len(),
        dead_lettered = report.dead_lettered.len(),
        "Reaper sweep complete"
    );
    print_json(&report)
}

async fn run_migrate_command(config: QueueConfig) -> anyhow::Result<()> {
    let store = connect_store(&config, DEFAULT_MAX_CONNECTIONS).await?;
    let applied = store.run_migrations().await.context("Migration failed")?;

    let output = MigrateOutput {
        status: if applied.is_empty() { "up_to_date" } else { "applied" },
        applied,
    };
    print_json(&output)
}
