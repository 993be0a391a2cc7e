//! One optimization cycle, end to end.
//!
//! read → screen → build → solve → plan → scale up ∥ commit → release → report
//!
//! Only failures to read shared inputs and global solve failures abort a
//! cycle, and they always abort before any scaling request or commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use edgealloc_id::{AppReqId, ClusterId, CycleId};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::commit::{AssignmentCommitter, CommitReport};
use crate::config::{CapacityConfig, Config};
use crate::db::{AssignmentStore, StoreError};
use crate::model::{ApplicationRequirement, Cluster, Device};
use crate::placement::{
    screen_device, BuildOutcome, CandidateAssignment, CostError, CostModel, DeviceDemand,
    InfeasibleReason, ProblemBuilder, SolveStatus, SolverAdapter, SolverError,
};
use crate::platform::{ClusterPlatform, PlatformError};
use crate::report::{ClusterReport, CycleReport, CycleStatus, RunMode, UnassignableDevice};
use crate::scaling::{plan_scaling, FleetLoad, ScalingOrchestrator};

/// Concurrent requirement fetches per cycle.
const REQUIREMENT_FETCH_CONCURRENCY: usize = 16;

/// Reasons a cycle stops before committing anything.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("assignment store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("platform unavailable: {0}")]
    Platform(#[from] PlatformError),

    #[error("assignment problem infeasible: {0}")]
    Infeasible(InfeasibleReason),

    #[error("solve timed out after {0:?} with no incumbent")]
    SolveTimeout(Duration),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

impl CycleError {
    /// Stable label for logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) | Self::Platform(_) => "input_unavailable",
            Self::Infeasible(_) => "problem_infeasible",
            Self::SolveTimeout(_) => "solve_timeout",
            Self::Solver(_) => "solver_error",
        }
    }

    pub fn status(&self) -> CycleStatus {
        CycleStatus::Aborted
    }
}

/// Tunables of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    pub cost_model: CostModel,
    pub capacity: CapacityConfig,
    pub load_per_instance: f64,
    pub stale_after: Duration,
    pub max_duration: Duration,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Result<Self, CostError> {
        Ok(Self {
            cost_model: CostModel::new(config.cost.carbon_weight)?,
            capacity: config.capacity.clone(),
            load_per_instance: config.scaling.load_per_instance,
            stale_after: config.cycle.stale_after,
            max_duration: config.cycle.max_duration,
        })
    }
}

/// Fleet snapshot split by role in this cycle.
struct Screened {
    demands: Vec<DeviceDemand>,
    fleet: Vec<FleetLoad>,
    baseline: BTreeMap<ClusterId, f64>,
    unassignable: Vec<UnassignableDevice>,
    stale: Vec<edgealloc_id::DeviceId>,
}

/// A solved candidate and how it was obtained.
struct Solved {
    candidate: CandidateAssignment,
    status: SolveStatus,
    relaxed: bool,
}

/// Runs optimization cycles against a store, a platform and a scaling
/// transport.
#[derive(Clone)]
pub struct CycleRunner {
    store: Arc<dyn AssignmentStore>,
    platform: Arc<dyn ClusterPlatform>,
    solver: SolverAdapter,
    orchestrator: ScalingOrchestrator,
    settings: CycleSettings,
}

impl CycleRunner {
    pub fn new(
        store: Arc<dyn AssignmentStore>,
        platform: Arc<dyn ClusterPlatform>,
        solver: SolverAdapter,
        orchestrator: ScalingOrchestrator,
        settings: CycleSettings,
    ) -> Self {
        Self {
            store,
            platform,
            solver,
            orchestrator,
            settings,
        }
    }

    /// Run one cycle.
    pub async fn run_once(&self, mode: RunMode) -> Result<CycleReport, CycleError> {
        self.run_at(mode, Utc::now()).await
    }

    /// Run one cycle with `now` as the clock for staleness.
    #[instrument(skip(self), fields(cycle_id))]
    pub async fn run_at(
        &self,
        mode: RunMode,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, CycleError> {
        let cycle_id = CycleId::new();
        tracing::Span::current().record("cycle_id", tracing::field::display(&cycle_id));
        let started = Instant::now();
        let deadline = started + self.settings.max_duration;

        let devices = self.store.load_devices().await?;
        let clusters = self.platform.list_clusters().await?;
        let requirements = self.fetch_requirements(&devices, now).await?;
        info!(
            devices = devices.len(),
            clusters = clusters.len(),
            requirements = requirements.len(),
            "Cycle inputs loaded"
        );

        let screened = self.screen(&devices, &clusters, &requirements, now);
        let mut report = CycleReport {
            cycle_id,
            mode,
            status: CycleStatus::Success,
            devices_total: devices.len(),
            solve_status: None,
            objective: None,
            relaxed: false,
            reassigned: Vec::new(),
            held_back: Vec::new(),
            already_placed: 0,
            unassignable: screened.unassignable,
            stale: screened.stale,
            commit_failures: Vec::new(),
            clusters: Vec::new(),
            elapsed: Duration::ZERO,
        };

        let Some(solved) = self
            .solve(screened.demands, &clusters, &screened.baseline)
            .await?
        else {
            info!("No device to optimize");
            report.elapsed = started.elapsed();
            return Ok(report);
        };
        report.solve_status = Some(solved.status);
        report.objective = Some(solved.candidate.objective);
        report.relaxed = solved.relaxed;

        let plan = plan_scaling(
            &screened.fleet,
            &solved.candidate.assignments,
            self.settings.load_per_instance,
        );
        report.already_placed = plan.unchanged;
        info!(
            affected_clusters = plan.targets.len(),
            moves = plan.moves.len(),
            "Scaling plan computed"
        );

        if mode == RunMode::DryRun {
            report.reassigned = plan.moves.clone();
            report.clusters = plan
                .targets
                .iter()
                .map(|target| ClusterReport::planned(target.clone()))
                .collect();
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        let requests = plan.scale_up_requests(&clusters);
        let committer = AssignmentCommitter::new(Arc::clone(&self.store));
        let (tx, rx) = mpsc::unbounded_channel();
        let (scaled_up, commit): (_, CommitReport) = tokio::join!(
            self.orchestrator.execute(requests, deadline, tx),
            committer.run(plan.moves.clone(), rx),
        );

        let releases = plan.scale_down_requests(&clusters, &scaled_up, &commit.committed);
        let released = if releases.is_empty() {
            BTreeMap::new()
        } else {
            info!(clusters = releases.len(), "Releasing capacity of vacated clusters");
            let (tx, _rx) = mpsc::unbounded_channel();
            self.orchestrator.execute(releases, deadline, tx).await
        };

        report.clusters = plan
            .targets
            .iter()
            .map(|target| ClusterReport {
                outcome: scaled_up.get(&target.cluster_id).cloned(),
                scale_down: released.get(&target.cluster_id).cloned(),
                ..ClusterReport::planned(target.clone())
            })
            .collect();
        report.reassigned = commit.committed;
        report.held_back = commit.held_back;
        report.commit_failures = commit.failures;
        report.status = report.derive_status();
        report.elapsed = started.elapsed();

        info!(
            status = %report.status,
            reassigned = report.reassigned.len(),
            held_back = report.held_back.len(),
            unassignable = report.unassignable.len(),
            scaling_failures = report.scaling_failures(),
            commit_failures = report.commit_failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Fetch the requirement of every non-stale device. `None` marks a
    /// requirement the platform no longer knows.
    async fn fetch_requirements(
        &self,
        devices: &[Device],
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<AppReqId, Option<ApplicationRequirement>>, CycleError> {
        let ids: BTreeSet<AppReqId> = devices
            .iter()
            .filter(|d| !self.is_stale(d, now))
            .map(|d| d.app_req_id)
            .collect();

        let permits = Arc::new(Semaphore::new(REQUIREMENT_FETCH_CONCURRENCY));
        let mut tasks = JoinSet::new();
        for id in ids {
            let platform = Arc::clone(&self.platform);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (id, platform.get_requirement(id).await)
            });
        }

        let mut requirements = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (id, result) =
                joined.map_err(|e| PlatformError::Unavailable(format!("fetch task failed: {e}")))?;
            requirements.insert(id, result?);
        }
        Ok(requirements)
    }

    fn is_stale(&self, device: &Device, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.settings.stale_after) {
            Ok(window) => now - device.last_seen > window,
            Err(_) => false,
        }
    }

    fn screen(
        &self,
        devices: &[Device],
        clusters: &[Cluster],
        requirements: &BTreeMap<AppReqId, Option<ApplicationRequirement>>,
        now: DateTime<Utc>,
    ) -> Screened {
        let mut screened = Screened {
            demands: Vec::new(),
            fleet: Vec::with_capacity(devices.len()),
            baseline: BTreeMap::new(),
            unassignable: Vec::new(),
            stale: Vec::new(),
        };

        for device in devices {
            let requirement = requirements.get(&device.app_req_id).and_then(Option::as_ref);

            let outcome = if self.is_stale(device, now) {
                screened.stale.push(device.device_id.clone());
                None
            } else {
                match screen_device(device, requirement, clusters, &self.settings.cost_model) {
                    Ok(demand) => Some(demand),
                    Err(reason) => {
                        info!(device_id = %device.device_id, %reason, "Device unassignable");
                        screened.unassignable.push(UnassignableDevice {
                            device_id: device.device_id.clone(),
                            reason,
                        });
                        None
                    }
                }
            };

            let load = match &outcome {
                Some(demand) => demand.load,
                None => requirement
                    .and_then(|r| device.effective_load(r))
                    .unwrap_or_else(|| positive_or_zero(device.estimated_load)),
            };

            if outcome.is_none() {
                if let Some(cluster_id) = device.cluster_id {
                    *screened.baseline.entry(cluster_id).or_default() += load;
                }
            }

            screened.fleet.push(FleetLoad {
                device_id: device.device_id.clone(),
                committed: device.cluster_id,
                load,
            });
            screened.demands.extend(outcome);
        }

        screened
    }

    /// Build and solve, retrying once with relaxed capacities when that is
    /// configured and the strict problem is infeasible.
    async fn solve(
        &self,
        demands: Vec<DeviceDemand>,
        clusters: &[Cluster],
        baseline: &BTreeMap<ClusterId, f64>,
    ) -> Result<Option<Solved>, CycleError> {
        let builder = ProblemBuilder::new(self.settings.capacity.include_committed_baseline);

        let reason = match self.solve_with(&builder, demands.clone(), clusters, baseline).await? {
            Attempt::Empty => return Ok(None),
            Attempt::Solved(candidate, status) => {
                return Ok(Some(Solved {
                    candidate,
                    status,
                    relaxed: false,
                }))
            }
            Attempt::Infeasible(reason) => reason,
        };

        let Some(factor) = self.settings.capacity.infeasible_relaxation else {
            return Err(CycleError::Infeasible(reason));
        };
        warn!(%reason, factor, "Problem infeasible, retrying with relaxed capacities");

        match self
            .solve_with(&builder.with_capacity_scale(factor), demands, clusters, baseline)
            .await?
        {
            Attempt::Empty => Ok(None),
            Attempt::Solved(candidate, status) => Ok(Some(Solved {
                candidate,
                status,
                relaxed: true,
            })),
            Attempt::Infeasible(reason) => Err(CycleError::Infeasible(reason)),
        }
    }

    async fn solve_with(
        &self,
        builder: &ProblemBuilder,
        demands: Vec<DeviceDemand>,
        clusters: &[Cluster],
        baseline: &BTreeMap<ClusterId, f64>,
    ) -> Result<Attempt, CycleError> {
        let problem = match builder.build(demands, clusters, baseline) {
            BuildOutcome::Empty => return Ok(Attempt::Empty),
            BuildOutcome::Infeasible(reason) => return Ok(Attempt::Infeasible(reason)),
            BuildOutcome::Ready(problem) => Arc::new(problem),
        };

        let result = self.solver.solve(problem).await?;
        match (result.status, result.candidate) {
            (status, Some(candidate)) => Ok(Attempt::Solved(candidate, status)),
            (SolveStatus::Timeout, None) => Err(CycleError::SolveTimeout(self.solver.time_limit())),
            (_, None) => Ok(Attempt::Infeasible(InfeasibleReason::ProvedBySolver)),
        }
    }
}

enum Attempt {
    Empty,
    Solved(CandidateAssignment, SolveStatus),
    Infeasible(InfeasibleReason),
}

fn positive_or_zero(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
