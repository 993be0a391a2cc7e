//! Optimizer background worker.
//!
//! Runs optimization cycles on a periodic interval. A cycle always runs to
//! completion; shutdown is observed between cycles.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::cycle::CycleRunner;
use crate::report::{CycleStatus, RunMode};

/// Worker that runs the optimization loop.
pub struct OptimizerWorker {
    runner: CycleRunner,
    interval: Duration,
}

impl OptimizerWorker {
    /// Create a new optimizer worker.
    pub fn new(runner: CycleRunner, interval: Duration) -> Self {
        Self { runner, interval }
    }

    /// Run the worker until shutdown is signaled. Returns the number of
    /// cycles run.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting optimizer worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // A cycle longer than the interval pushes the next one back instead
        // of triggering a burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                    cycles += 1;
                }
                // A dropped sender can never signal again.
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Optimizer worker shutting down");
                        break;
                    }
                }
            }
        }

        cycles
    }

    /// Run a single cycle and log its outcome.
    async fn run_cycle(&self) {
        match self.runner.run_once(RunMode::Apply).await {
            Ok(report) if report.status == CycleStatus::Success => {
                info!(
                    cycle_id = %report.cycle_id,
                    reassigned = report.reassigned.len(),
                    "Optimization cycle succeeded"
                );
            }
            Ok(report) => {
                warn!(
                    cycle_id = %report.cycle_id,
                    status = %report.status,
                    held_back = report.held_back.len(),
                    scaling_failures = report.scaling_failures(),
                    commit_failures = report.commit_failures.len(),
                    "Optimization cycle partially applied"
                );
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Optimization cycle aborted");
            }
        }
    }
}
