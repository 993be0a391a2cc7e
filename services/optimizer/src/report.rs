//! Per-cycle summary.

use std::fmt;
use std::time::Duration;

use edgealloc_id::{ClusterId, CycleId, DeviceId};
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::commit::CommitFailure;
use crate::placement::{SolveStatus, UnassignableReason};
use crate::scaling::{ClusterTarget, DeviceMove, ScalingOutcome};

/// Whether a cycle changed live infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Apply,
    /// Solve and plan only; no scaling requests, no commits.
    DryRun,
}

/// Overall cycle result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Success,
    /// Some clusters failed to scale or some commits failed.
    Partial,
    /// The cycle stopped before any commit.
    Aborted,
}

impl CycleStatus {
    /// Process exit code for a single-cycle run.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Partial => 2,
            Self::Aborted => 3,
        }
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// An affected cluster and what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    pub target: ClusterTarget,
    /// Scale-up outcome. `None` in dry runs and for clusters that only lose
    /// devices.
    pub outcome: Option<ScalingOutcome>,
    /// Capacity released after departures committed.
    pub scale_down: Option<ScalingOutcome>,
}

impl ClusterReport {
    pub fn planned(target: ClusterTarget) -> Self {
        Self {
            target,
            outcome: None,
            scale_down: None,
        }
    }

    fn failed(&self) -> bool {
        [&self.outcome, &self.scale_down]
            .into_iter()
            .any(|o| matches!(o, Some(ScalingOutcome::Failed { .. })))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnassignableDevice {
    pub device_id: DeviceId,
    pub reason: UnassignableReason,
}

/// Everything one cycle did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub mode: RunMode,
    pub status: CycleStatus,
    pub devices_total: usize,
    pub solve_status: Option<SolveStatus>,
    pub objective: Option<f64>,
    /// Capacities were relaxed to find a solution.
    pub relaxed: bool,
    /// Moves written to the store (planned moves in dry runs).
    pub reassigned: Vec<DeviceMove>,
    /// Moves not applied because the destination failed to scale.
    pub held_back: Vec<DeviceMove>,
    /// Devices whose candidate equals their committed cluster.
    pub already_placed: usize,
    pub unassignable: Vec<UnassignableDevice>,
    pub stale: Vec<DeviceId>,
    pub commit_failures: Vec<CommitFailure>,
    pub clusters: Vec<ClusterReport>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn scaling_failures(&self) -> usize {
        self.clusters.iter().filter(|c| c.failed()).count()
    }

    /// Status implied by scaling and commit failures.
    pub fn derive_status(&self) -> CycleStatus {
        if self.scaling_failures() > 0 || !self.commit_failures.is_empty() {
            CycleStatus::Partial
        } else {
            CycleStatus::Success
        }
    }

    /// Human-readable tables.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let summary = [
            SummaryRow::new("devices", self.devices_total),
            SummaryRow::new("reassigned", self.reassigned.len()),
            SummaryRow::new("already placed", self.already_placed),
            SummaryRow::new("held back (scaling failed)", self.held_back.len()),
            SummaryRow::new("unassignable", self.unassignable.len()),
            SummaryRow::new("stale", self.stale.len()),
            SummaryRow::new("commit failures", self.commit_failures.len()),
            SummaryRow::new("clusters affected", self.clusters.len()),
            SummaryRow::new("clusters failed", self.scaling_failures()),
        ];
        out.push_str(&Table::new(summary).to_string());

        if !self.clusters.is_empty() {
            let rows: Vec<ClusterRow> = self
                .clusters
                .iter()
                .map(|c| ClusterRow::new(c, self.mode))
                .collect();
            out.push('\n');
            out.push_str(&Table::new(rows).to_string());
        }

        let moves: Vec<MoveRow> = self
            .reassigned
            .iter()
            .map(|m| MoveRow::new(m, "committed"))
            .chain(self.held_back.iter().map(|m| MoveRow::new(m, "held back")))
            .collect();
        if !moves.is_empty() {
            out.push('\n');
            out.push_str(&Table::new(moves).to_string());
        }

        if !self.unassignable.is_empty() {
            let rows: Vec<UnassignableRow> = self
                .unassignable
                .iter()
                .map(|u| UnassignableRow {
                    device: u.device_id.to_string(),
                    reason: u.reason.to_string(),
                })
                .collect();
            out.push('\n');
            out.push_str(&Table::new(rows).to_string());
        }

        out
    }
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Count")]
    count: usize,
}

impl SummaryRow {
    fn new(metric: &'static str, count: usize) -> Self {
        Self { metric, count }
    }
}

#[derive(Tabled)]
struct ClusterRow {
    #[tabled(rename = "Cluster")]
    cluster: ClusterId,
    #[tabled(rename = "Load")]
    load: String,
    #[tabled(rename = "Instances")]
    instances: String,
    #[tabled(rename = "Devices")]
    devices: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

impl ClusterRow {
    fn new(report: &ClusterReport, mode: RunMode) -> Self {
        let t = &report.target;
        let phases: Vec<String> = [("", &report.outcome), ("released: ", &report.scale_down)]
            .into_iter()
            .filter_map(|(label, outcome)| {
                let text = match outcome.as_ref()? {
                    ScalingOutcome::Scaled {
                        achieved_capacity, ..
                    } => format!("scaled to {achieved_capacity}"),
                    ScalingOutcome::Failed { reason, .. } => format!("failed: {reason}"),
                };
                Some(format!("{label}{text}"))
            })
            .collect();
        let outcome = match (mode, phases.is_empty()) {
            (RunMode::DryRun, _) => "planned".to_string(),
            (RunMode::Apply, true) => "unchanged".to_string(),
            (RunMode::Apply, false) => phases.join(", "),
        };
        Self {
            cluster: t.cluster_id,
            load: format!("{:.2} -> {:.2}", t.current_load, t.target_load),
            instances: format!("{} -> {}", t.current_cardinality, t.target_cardinality),
            devices: format!("+{} / -{}", t.gained, t.lost),
            outcome,
        }
    }
}

#[derive(Tabled)]
struct MoveRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: ClusterId,
    #[tabled(rename = "Status")]
    status: &'static str,
}

impl MoveRow {
    fn new(m: &DeviceMove, status: &'static str) -> Self {
        Self {
            device: m.device_id.to_string(),
            from: m.from.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            to: m.to,
            status,
        }
    }
}

#[derive(Tabled)]
struct UnassignableRow {
    #[tabled(rename = "Unassignable device")]
    device: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
