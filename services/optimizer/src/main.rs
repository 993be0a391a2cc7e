//! edgealloc optimizer
//!
//! Assigns edge devices to clusters by minimizing a blended energy/carbon
//! cost, scales the affected clusters and commits the realized assignments.

mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgealloc_optimizer::{
    check,
    config::Config,
    cycle::{CycleRunner, CycleSettings},
    db::{AssignmentStore, Database},
    placement::{MicroLpBackend, SolverAdapter},
    platform::{ClusterPlatform, HttpPlatformClient},
    report::RunMode,
    scaling::{HttpScalingClient, ScalingOrchestrator},
    worker::OptimizerWorker,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use output::OutputFormat;

/// Carbon-aware device-to-cluster assignment optimizer.
#[derive(Debug, Parser)]
#[command(name = "optimizer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format for summaries.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one optimization cycle and exit with its status code.
    Run {
        /// Solve and plan without scaling clusters or committing.
        #[arg(long, env = "EDGEALLOC_DRY_RUN")]
        dry_run: bool,
    },

    /// Run optimization cycles on an interval until interrupted.
    Daemon {
        /// Seconds between cycle starts.
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Check store and platform connectivity and verify the solver.
    Check,
}

/// Everything a cycle needs, wired from configuration.
struct Components {
    store: Arc<dyn AssignmentStore>,
    platform: Arc<dyn ClusterPlatform>,
    solver: SolverAdapter,
    runner: CycleRunner,
}

impl Components {
    async fn connect(config: &Config) -> Result<Self> {
        let db = Database::connect(&config.database).await?;
        let store: Arc<dyn AssignmentStore> = Arc::new(db.assignment_store());
        let platform: Arc<dyn ClusterPlatform> = Arc::new(
            HttpPlatformClient::new(&config.platform).context("Failed to build platform client")?,
        );
        let scaling = Arc::new(
            HttpScalingClient::new(&config.scaling).context("Failed to build scaling client")?,
        );
        let solver = SolverAdapter::new(Arc::new(MicroLpBackend), config.solver.time_limit);
        let orchestrator = ScalingOrchestrator::new(scaling, config.scaling.retry_policy()?);
        let settings = CycleSettings::from_config(config)?;

        let runner = CycleRunner::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            solver.clone(),
            orchestrator,
            settings,
        );

        Ok(Self {
            store,
            platform,
            solver,
            runner,
        })
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to EDGEALLOC_LOG_LEVEL).
    // Logs go to stderr so summaries on stdout stay machine-readable.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    info!(
        platform_url = %config.platform.base_url,
        carbon_weight = config.cost.carbon_weight,
        include_committed_baseline = config.capacity.include_committed_baseline,
        "Configuration loaded"
    );

    let components = Components::connect(&config).await?;

    match cli.command {
        Command::Run { dry_run } => {
            let mode = if dry_run { RunMode::DryRun } else { RunMode::Apply };
            match components.runner.run_once(mode).await {
                Ok(report) => {
                    output::print_report(&report, cli.format);
                    Ok(report.status.exit_code())
                }
                Err(e) => {
                    error!(kind = e.kind(), error = %e, "Cycle aborted");
                    let code = e.status().exit_code();
                    output::print_error(&anyhow::Error::from(e));
                    Ok(code)
                }
            }
        }
        Command::Daemon { interval } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or(config.cycle.interval);
            run_daemon(components.runner, interval, config.cycle.max_duration).await?;
            Ok(0)
        }
        Command::Check => {
            let results = check::run_checks(
                components.store.as_ref(),
                components.platform.as_ref(),
                &components.solver,
            )
            .await;
            output::print_checks(&results, cli.format);
            Ok(if results.iter().all(|r| r.passed) { 0 } else { 1 })
        }
    }
}

async fn run_daemon(runner: CycleRunner, interval: Duration, max_cycle: Duration) -> Result<()> {
    info!("Starting edgealloc optimizer daemon");

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = OptimizerWorker::new(runner, interval);
    let mut worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            match result {
                Ok(cycles) => warn!(cycles, "Worker exited unexpectedly"),
                Err(e) => error!(error = %e, "Worker task panicked"),
            }
            return Ok(());
        }
    }

    // Signal shutdown to the worker
    let _ = shutdown_tx.send(true);

    // An in-progress cycle is bounded by the cycle deadline plus its solve.
    info!("Waiting for worker to shut down...");
    let shutdown_timeout = max_cycle + Duration::from_secs(10);
    match tokio::time::timeout(shutdown_timeout, worker_handle).await {
        Ok(Ok(cycles)) => info!(cycles, "Optimizer shutdown complete"),
        Ok(Err(e)) => error!(error = %e, "Worker task panicked"),
        Err(_) => warn!("Worker did not shut down in time"),
    }

    Ok(())
}
