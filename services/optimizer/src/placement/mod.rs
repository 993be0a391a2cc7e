//! Placement: from fleet snapshot to candidate assignment.
//!
//! The pipeline runs leaf-first:
//! - `filter`: clusters satisfying each device's hard constraints
//! - `cost`: energy/carbon coefficient per feasible (device, cluster) pair
//! - `problem`: the binary assignment MILP built from the costed options
//! - `solver`: bounded MILP solve and decoding into a candidate assignment

pub mod cost;
pub mod filter;
pub mod problem;
pub mod solver;

use std::fmt;

use edgealloc_id::{ClusterId, DeviceId};
use serde::Serialize;
use tracing::debug;

use crate::model::{ApplicationRequirement, Cluster, Device};

pub use cost::{CostError, CostModel};
pub use filter::feasible_clusters;
pub use problem::{AssignmentProblem, BuildOutcome, InfeasibleReason, ProblemBuilder};
pub use solver::{
    BackendStatus, CandidateAssignment, MicroLpBackend, MilpBackend, SolveResult, SolveStatus,
    SolverAdapter, SolverError,
};

/// One costed placement option for a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostedOption {
    pub cluster_id: ClusterId,
    pub cost: f64,
}

/// A device that takes part in this cycle's problem.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDemand {
    pub device_id: DeviceId,
    pub load: f64,
    pub current_cluster: Option<ClusterId>,
    /// Feasible, costed options ordered by cluster id.
    pub options: Vec<CostedOption>,
}

/// Why a device was left out of this cycle's problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnassignableReason {
    /// No cluster satisfies the hard constraints.
    NoFeasibleCluster,
    /// The platform no longer knows the device's requirement.
    RequirementMissing,
    /// Neither the device nor its requirement carries a usable load.
    InvalidLoad,
    /// Every feasible cluster failed the cost model.
    NoCostableCluster,
}

impl fmt::Display for UnassignableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoFeasibleCluster => "no_feasible_cluster",
            Self::RequirementMissing => "requirement_missing",
            Self::InvalidLoad => "invalid_load",
            Self::NoCostableCluster => "no_costable_cluster",
        };
        f.write_str(s)
    }
}

/// Turn one device into a problem participant, or explain why it cannot be.
///
/// `requirement` is `None` when the platform reported the requirement as
/// missing.
pub fn screen_device(
    device: &Device,
    requirement: Option<&ApplicationRequirement>,
    clusters: &[Cluster],
    cost_model: &CostModel,
) -> Result<DeviceDemand, UnassignableReason> {
    let requirement = requirement.ok_or(UnassignableReason::RequirementMissing)?;
    let load = device
        .effective_load(requirement)
        .ok_or(UnassignableReason::InvalidLoad)?;

    let feasible = feasible_clusters(requirement, clusters);
    if feasible.is_empty() {
        return Err(UnassignableReason::NoFeasibleCluster);
    }

    let mut options: Vec<CostedOption> = clusters
        .iter()
        .filter(|cluster| feasible.contains(&cluster.id))
        .filter_map(|cluster| match cost_model.cost(load, cluster) {
            Ok(cost) => Some(CostedOption {
                cluster_id: cluster.id,
                cost,
            }),
            Err(e) => {
                debug!(
                    device_id = %device.device_id,
                    cluster_id = %cluster.id,
                    error = %e,
                    "Dropping uncostable cluster"
                );
                None
            }
        })
        .collect();

    if options.is_empty() {
        return Err(UnassignableReason::NoCostableCluster);
    }
    options.sort_by_key(|o| o.cluster_id);
    options.dedup_by_key(|o| o.cluster_id);

    Ok(DeviceDemand {
        device_id: device.device_id.clone(),
        load,
        current_cluster: device.cluster_id,
        options,
    })
}
