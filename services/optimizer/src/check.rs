//! Environment checks: store and platform reachability plus a toy solve.

use std::collections::BTreeMap;
use std::sync::Arc;

use edgealloc_id::{ClusterId, DeviceId};
use serde::Serialize;
use tabled::Tabled;
use tracing::{info, warn};

use crate::db::AssignmentStore;
use crate::model::{Cluster, ClusterLocation, Confidentiality};
use crate::placement::{
    BuildOutcome, CostModel, CostedOption, DeviceDemand, ProblemBuilder, SolveStatus,
    SolverAdapter,
};
use crate::platform::ClusterPlatform;

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct CheckResult {
    #[tabled(rename = "Check")]
    pub name: &'static str,
    #[tabled(rename = "Passed")]
    pub passed: bool,
    #[tabled(rename = "Detail")]
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Run every check. Checks are independent; one failing does not skip the
/// others.
pub async fn run_checks(
    store: &dyn AssignmentStore,
    platform: &dyn ClusterPlatform,
    solver: &SolverAdapter,
) -> Vec<CheckResult> {
    let store_check = match store.health_check().await {
        Ok(()) => CheckResult::pass("store", "reachable"),
        Err(e) => CheckResult::fail("store", e.to_string()),
    };

    let platform_check = match platform.list_clusters().await {
        Ok(clusters) => CheckResult::pass("platform", format!("{} clusters", clusters.len())),
        Err(e) => CheckResult::fail("platform", e.to_string()),
    };

    let results = vec![store_check, platform_check, check_solver(solver).await];
    for result in &results {
        if result.passed {
            info!(check = result.name, detail = %result.detail, "Check passed");
        } else {
            warn!(check = result.name, detail = %result.detail, "Check failed");
        }
    }
    results
}

/// Solve a two-cluster, two-device problem whose answer is known: both
/// devices fit on the cheaper cluster 1.
pub async fn check_solver(solver: &SolverAdapter) -> CheckResult {
    const NAME: &str = "solver";

    let clusters = [
        toy_cluster(1, 2.0, 2.5, 500.0),
        toy_cluster(2, 4.0, 3.0, 1000.0),
    ];
    let model = match CostModel::new(0.5) {
        Ok(model) => model,
        Err(e) => return CheckResult::fail(NAME, e.to_string()),
    };

    let mut demands = Vec::new();
    for (id, load) in [("toy-11", 0.1), ("toy-12", 0.2)] {
        let device_id = match DeviceId::parse(id) {
            Ok(id) => id,
            Err(e) => return CheckResult::fail(NAME, e.to_string()),
        };
        let options = clusters
            .iter()
            .filter_map(|c| {
                model.cost(load, c).ok().map(|cost| CostedOption {
                    cluster_id: c.id,
                    cost,
                })
            })
            .collect();
        demands.push(DeviceDemand {
            device_id,
            load,
            current_cluster: None,
            options,
        });
    }

    let problem = match ProblemBuilder::new(false).build(demands, &clusters, &BTreeMap::new()) {
        BuildOutcome::Ready(problem) => Arc::new(problem),
        other => return CheckResult::fail(NAME, format!("unexpected build outcome: {other:?}")),
    };

    let result = match solver.solve(problem).await {
        Ok(result) => result,
        Err(e) => return CheckResult::fail(NAME, e.to_string()),
    };

    match (result.status, result.candidate) {
        (SolveStatus::Optimal, Some(candidate))
            if candidate.assignments.values().all(|c| *c == ClusterId::new(1)) =>
        {
            CheckResult::pass(NAME, format!("optimal, objective {:.2}", candidate.objective))
        }
        (status, candidate) => CheckResult::fail(
            NAME,
            format!("unexpected solve result: {status}, {:?}", candidate.map(|c| c.assignments)),
        ),
    }
}

fn toy_cluster(id: i64, headroom: f64, energy: f64, carbon: f64) -> Cluster {
    Cluster {
        id: ClusterId::new(id),
        name: format!("toy-{id}"),
        flavour: "toy".to_string(),
        confidentiality: Confidentiality::Public,
        provider: "toy".to_string(),
        location: ClusterLocation::default(),
        headroom,
        energy_coefficient: Some(energy),
        carbon_coefficient: Some(carbon),
        scaling_endpoint: None,
    }
}
