//! Binary assignment MILP construction.
//!
//! One boolean variable per feasible (device, cluster) pair:
//!
//! ```text
//! minimize    Σ cost[d,c] · x[d,c]
//! subject to  Σ_c x[d,c] = 1                      for every device d
//!             Σ_d load[d] · x[d,c] ≤ limit[c]     for every cluster c
//!             x[d,c] ∈ {0, 1}
//! ```
//!
//! `limit[c]` is the cluster headroom (optionally scaled by a relaxation
//! factor) minus the committed load of devices outside the problem, when that
//! baseline is enabled. Construction order is deterministic: devices by id,
//! then options by cluster id.

use std::collections::BTreeMap;
use std::ops::Range;

use edgealloc_id::{ClusterId, DeviceId};
use thiserror::Error;
use tracing::{debug, warn};

use super::DeviceDemand;
use crate::model::Cluster;

/// Numerical tolerance for capacity checks.
pub const CAPACITY_EPSILON: f64 = 1e-6;

/// A decision variable `x[device, cluster]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemVariable {
    /// Index into [`AssignmentProblem::devices`].
    pub device: usize,
    pub cluster_id: ClusterId,
    pub cost: f64,
}

/// The exactly-one row of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRow {
    pub device_id: DeviceId,
    pub load: f64,
    pub current_cluster: Option<ClusterId>,
    /// Contiguous range of this device's variables.
    pub variables: Range<usize>,
}

/// The capacity row of a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityRow {
    pub cluster_id: ClusterId,
    pub limit: f64,
    pub variables: Vec<usize>,
}

/// Why the problem has no admissible assignment.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InfeasibleReason {
    #[error("device {device_id} needs {load} but its largest feasible cluster has {largest_limit}")]
    DeviceDoesNotFit {
        device_id: DeviceId,
        load: f64,
        largest_limit: f64,
    },

    #[error("aggregate demand {demand} exceeds aggregate capacity {capacity}")]
    AggregateCapacity { demand: f64, capacity: f64 },

    #[error("solver proved the capacity constraints cannot be met")]
    ProvedBySolver,
}

/// Result of building a problem.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// No device takes part; nothing to solve.
    Empty,
    Ready(AssignmentProblem),
    Infeasible(InfeasibleReason),
}

/// A solver-agnostic binary assignment problem.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentProblem {
    devices: Vec<DeviceRow>,
    variables: Vec<ProblemVariable>,
    capacity_rows: Vec<CapacityRow>,
    incumbent: Option<Vec<usize>>,
}

impl AssignmentProblem {
    pub fn devices(&self) -> &[DeviceRow] {
        &self.devices
    }

    pub fn variables(&self) -> &[ProblemVariable] {
        &self.variables
    }

    pub fn capacity_rows(&self) -> &[CapacityRow] {
        &self.capacity_rows
    }

    /// The committed assignment as a variable selection, when it is
    /// admissible for this problem.
    pub fn incumbent(&self) -> Option<&[usize]> {
        self.incumbent.as_deref()
    }

    /// Objective value of a selection (one variable index per device).
    pub fn objective(&self, selection: &[usize]) -> f64 {
        selection.iter().map(|&v| self.variables[v].cost).sum()
    }

    /// Verify a selection satisfies every constraint.
    pub fn check_selection(&self, selection: &[usize]) -> Result<(), String> {
        if selection.len() != self.devices.len() {
            return Err(format!(
                "selection covers {} devices, problem has {}",
                selection.len(),
                self.devices.len()
            ));
        }

        let mut used: BTreeMap<ClusterId, f64> = BTreeMap::new();
        for (row, &var) in self.devices.iter().zip(selection) {
            if !row.variables.contains(&var) {
                return Err(format!(
                    "device {} assigned to a variable outside its feasible set",
                    row.device_id
                ));
            }
            *used.entry(self.variables[var].cluster_id).or_default() += row.load;
        }

        for capacity in &self.capacity_rows {
            let load = used.get(&capacity.cluster_id).copied().unwrap_or(0.0);
            if load > capacity.limit + CAPACITY_EPSILON {
                return Err(format!(
                    "cluster {} loaded to {} above limit {}",
                    capacity.cluster_id, load, capacity.limit
                ));
            }
        }
        Ok(())
    }

    /// Decode raw variable values into a selection.
    pub fn select_from_values(&self, values: &[f64]) -> Result<Vec<usize>, String> {
        if values.len() != self.variables.len() {
            return Err(format!(
                "expected {} variable values, got {}",
                self.variables.len(),
                values.len()
            ));
        }

        self.devices
            .iter()
            .map(|row| {
                let chosen: Vec<usize> = row.variables.clone().filter(|&v| values[v] > 0.5).collect();
                match chosen.as_slice() {
                    [single] => Ok(*single),
                    _ => Err(format!(
                        "device {} has {} active assignments",
                        row.device_id,
                        chosen.len()
                    )),
                }
            })
            .collect()
    }

    /// Device → cluster mapping for a selection.
    pub fn assignment(&self, selection: &[usize]) -> BTreeMap<DeviceId, ClusterId> {
        self.devices
            .iter()
            .zip(selection)
            .map(|(row, &v)| (row.device_id.clone(), self.variables[v].cluster_id))
            .collect()
    }
}

/// Builds [`AssignmentProblem`]s from screened devices.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemBuilder {
    include_committed_baseline: bool,
    capacity_scale: f64,
}

impl ProblemBuilder {
    pub fn new(include_committed_baseline: bool) -> Self {
        Self {
            include_committed_baseline,
            capacity_scale: 1.0,
        }
    }

    /// Multiply every cluster's headroom by `scale` (relaxed retry).
    pub fn with_capacity_scale(mut self, scale: f64) -> Self {
        self.capacity_scale = scale;
        self
    }

    /// Build the problem.
    ///
    /// `baseline` is the committed load per cluster from devices that are
    /// not part of `demands`.
    pub fn build(
        &self,
        mut demands: Vec<DeviceDemand>,
        clusters: &[Cluster],
        baseline: &BTreeMap<ClusterId, f64>,
    ) -> BuildOutcome {
        if demands.is_empty() {
            return BuildOutcome::Empty;
        }
        demands.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        let limits = self.cluster_limits(clusters, baseline);
        let limit_of = |id: &ClusterId| limits.get(id).copied().unwrap_or(0.0);

        let mut devices = Vec::with_capacity(demands.len());
        let mut variables = Vec::new();
        let mut per_cluster: BTreeMap<ClusterId, Vec<usize>> = BTreeMap::new();
        let mut total_demand = 0.0;

        for (index, mut demand) in demands.into_iter().enumerate() {
            demand.options.sort_by_key(|o| o.cluster_id);
            demand.options.dedup_by_key(|o| o.cluster_id);

            let largest_limit = demand
                .options
                .iter()
                .map(|o| limit_of(&o.cluster_id))
                .fold(0.0_f64, f64::max);
            if demand.options.is_empty() || demand.load > largest_limit + CAPACITY_EPSILON {
                return BuildOutcome::Infeasible(InfeasibleReason::DeviceDoesNotFit {
                    device_id: demand.device_id,
                    load: demand.load,
                    largest_limit,
                });
            }

            let start = variables.len();
            for option in &demand.options {
                per_cluster
                    .entry(option.cluster_id)
                    .or_default()
                    .push(variables.len());
                variables.push(ProblemVariable {
                    device: index,
                    cluster_id: option.cluster_id,
                    cost: option.cost,
                });
            }

            total_demand += demand.load;
            devices.push(DeviceRow {
                device_id: demand.device_id,
                load: demand.load,
                current_cluster: demand.current_cluster,
                variables: start..variables.len(),
            });
        }

        let capacity_rows: Vec<CapacityRow> = per_cluster
            .into_iter()
            .map(|(cluster_id, vars)| CapacityRow {
                cluster_id,
                limit: limit_of(&cluster_id),
                variables: vars,
            })
            .collect();

        let total_capacity: f64 = capacity_rows.iter().map(|row| row.limit).sum();
        if total_demand > total_capacity + CAPACITY_EPSILON {
            return BuildOutcome::Infeasible(InfeasibleReason::AggregateCapacity {
                demand: total_demand,
                capacity: total_capacity,
            });
        }

        let mut problem = AssignmentProblem {
            devices,
            variables,
            capacity_rows,
            incumbent: None,
        };
        problem.incumbent = committed_selection(&problem);

        debug!(
            devices = problem.devices.len(),
            variables = problem.variables.len(),
            clusters = problem.capacity_rows.len(),
            has_incumbent = problem.incumbent.is_some(),
            "Assignment problem built"
        );

        BuildOutcome::Ready(problem)
    }

    fn cluster_limits(
        &self,
        clusters: &[Cluster],
        baseline: &BTreeMap<ClusterId, f64>,
    ) -> BTreeMap<ClusterId, f64> {
        clusters
            .iter()
            .map(|cluster| {
                let headroom = if cluster.headroom.is_finite() {
                    cluster.headroom.max(0.0) * self.capacity_scale
                } else {
                    0.0
                };
                let pinned = if self.include_committed_baseline {
                    baseline.get(&cluster.id).copied().unwrap_or(0.0)
                } else {
                    0.0
                };
                if pinned > headroom {
                    warn!(
                        cluster_id = %cluster.id,
                        headroom,
                        pinned,
                        "Committed baseline already exceeds cluster headroom"
                    );
                }
                (cluster.id, (headroom - pinned).max(0.0))
            })
            .collect()
    }
}

/// The committed assignment, if every device sits on one of its options and
/// the result respects capacity.
fn committed_selection(problem: &AssignmentProblem) -> Option<Vec<usize>> {
    let selection: Option<Vec<usize>> = problem
        .devices
        .iter()
        .map(|row| {
            let current = row.current_cluster?;
            row.variables
                .clone()
                .find(|&v| problem.variables[v].cluster_id == current)
        })
        .collect();

    selection.filter(|s| problem.check_selection(s).is_ok())
}
