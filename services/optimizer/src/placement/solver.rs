//! Bounded MILP solve and decoding.
//!
//! The backend is synchronous and CPU-bound, so the adapter runs it on the
//! blocking pool under a time limit. A backend that overruns the limit keeps
//! its thread until it returns; its result is discarded.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use edgealloc_id::{ClusterId, DeviceId};
use good_lp::{
    constraint, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel,
    Variable,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::problem::AssignmentProblem;

/// Solver adapter errors. Any of these aborts the cycle.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver backend failed: {0}")]
    Backend(String),

    #[error("solution failed verification: {0}")]
    Verification(String),

    #[error("solver task failed: {0}")]
    Join(String),
}

/// What a backend reports.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendStatus {
    /// Proven optimal; one value per problem variable.
    Optimal(Vec<f64>),
    /// Feasible but not proven optimal.
    Feasible(Vec<f64>),
    Infeasible,
}

/// A MILP solving capability.
pub trait MilpBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn solve(&self, problem: &AssignmentProblem) -> Result<BackendStatus, SolverError>;
}

/// Pure-Rust branch-and-bound via `good_lp`'s `microlp` backend.
///
/// Solves to proven optimality, so the relative gap is always zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicroLpBackend;

impl MilpBackend for MicroLpBackend {
    fn name(&self) -> &'static str {
        "microlp"
    }

    fn solve(&self, problem: &AssignmentProblem) -> Result<BackendStatus, SolverError> {
        let mut vars = ProblemVariables::new();
        let xs: Vec<Variable> = problem
            .variables()
            .iter()
            .map(|_| vars.add(variable().binary()))
            .collect();

        let mut objective = Expression::with_capacity(xs.len());
        for (x, var) in xs.iter().zip(problem.variables()) {
            objective.add_mul(var.cost, *x);
        }

        let mut model = vars.minimise(objective).using(good_lp::microlp);

        for row in problem.devices() {
            let mut assigned = Expression::with_capacity(row.variables.len());
            for v in row.variables.clone() {
                assigned.add_mul(1.0, xs[v]);
            }
            model = model.with(constraint!(assigned == 1.0));
        }

        for capacity in problem.capacity_rows() {
            let mut used = Expression::with_capacity(capacity.variables.len());
            for &v in &capacity.variables {
                let load = problem.devices()[problem.variables()[v].device].load;
                used.add_mul(load, xs[v]);
            }
            model = model.with(constraint!(used <= capacity.limit));
        }

        match model.solve() {
            Ok(solution) => Ok(BackendStatus::Optimal(
                xs.iter().map(|x| solution.value(*x)).collect(),
            )),
            Err(ResolutionError::Infeasible) => Ok(BackendStatus::Infeasible),
            Err(e) => Err(SolverError::Backend(e.to_string())),
        }
    }
}

/// Solve status reported for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    /// The time limit elapsed. A candidate exists only if an incumbent did.
    Timeout,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Optimal => "optimal",
            Self::Feasible => "feasible",
            Self::Infeasible => "infeasible",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// The solver's proposed device → cluster mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAssignment {
    pub assignments: BTreeMap<DeviceId, ClusterId>,
    pub objective: f64,
}

/// Result of [`SolverAdapter::solve`].
#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub candidate: Option<CandidateAssignment>,
}

/// Runs a backend under a time limit and verifies its answer.
#[derive(Clone)]
pub struct SolverAdapter {
    backend: Arc<dyn MilpBackend>,
    time_limit: Duration,
}

impl SolverAdapter {
    pub fn new(backend: Arc<dyn MilpBackend>, time_limit: Duration) -> Self {
        Self {
            backend,
            time_limit,
        }
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    #[instrument(
        skip(self, problem),
        fields(
            backend = self.backend.name(),
            devices = problem.devices().len(),
            variables = problem.variables().len()
        )
    )]
    pub async fn solve(&self, problem: Arc<AssignmentProblem>) -> Result<SolveResult, SolverError> {
        let backend = Arc::clone(&self.backend);
        let task_problem = Arc::clone(&problem);
        let task = tokio::task::spawn_blocking(move || backend.solve(&task_problem));

        let status = match tokio::time::timeout(self.time_limit, task).await {
            Ok(joined) => joined.map_err(|e| SolverError::Join(e.to_string()))??,
            Err(_) => return Ok(self.fall_back_to_incumbent(&problem)),
        };

        let (status, values) = match status {
            BackendStatus::Optimal(values) => (SolveStatus::Optimal, values),
            BackendStatus::Feasible(values) => (SolveStatus::Feasible, values),
            BackendStatus::Infeasible => {
                info!("Solver proved problem infeasible");
                return Ok(SolveResult {
                    status: SolveStatus::Infeasible,
                    candidate: None,
                });
            }
        };

        let selection = problem
            .select_from_values(&values)
            .map_err(SolverError::Verification)?;
        problem
            .check_selection(&selection)
            .map_err(SolverError::Verification)?;

        let candidate = CandidateAssignment {
            assignments: problem.assignment(&selection),
            objective: problem.objective(&selection),
        };
        info!(%status, objective = candidate.objective, "Solve finished");

        Ok(SolveResult {
            status,
            candidate: Some(candidate),
        })
    }

    fn fall_back_to_incumbent(&self, problem: &AssignmentProblem) -> SolveResult {
        let candidate = problem.incumbent().map(|selection| CandidateAssignment {
            assignments: problem.assignment(selection),
            objective: problem.objective(selection),
        });
        warn!(
            time_limit_ms = self.time_limit.as_millis() as u64,
            has_incumbent = candidate.is_some(),
            "Solve timed out"
        );
        SolveResult {
            status: SolveStatus::Timeout,
            candidate,
        }
    }
}

impl fmt::Debug for SolverAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverAdapter")
            .field("backend", &self.backend.name())
            .field("time_limit", &self.time_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cluster, ClusterLocation, Confidentiality};
    use crate::placement::problem::{BuildOutcome, ProblemBuilder};
    use crate::placement::{CostedOption, DeviceDemand};
    use proptest::prelude::*;

    fn cluster(id: i64, headroom: f64) -> Cluster {
        Cluster {
            id: ClusterId::new(id),
            name: String::new(),
            flavour: "A".to_string(),
            confidentiality: Confidentiality::Public,
            provider: "p".to_string(),
            location: ClusterLocation::default(),
            headroom,
            energy_coefficient: Some(1.0),
            carbon_coefficient: Some(1.0),
            scaling_endpoint: None,
        }
    }

    fn demand(id: &str, load: f64, current: Option<i64>, options: &[(i64, f64)]) -> DeviceDemand {
        DeviceDemand {
            device_id: DeviceId::parse(id).unwrap(),
            load,
            current_cluster: current.map(ClusterId::new),
            options: options
                .iter()
                .map(|&(c, cost)| CostedOption {
                    cluster_id: ClusterId::new(c),
                    cost,
                })
                .collect(),
        }
    }

    fn build(demands: Vec<DeviceDemand>, clusters: &[Cluster]) -> Arc<AssignmentProblem> {
        match ProblemBuilder::new(true).build(demands, clusters, &BTreeMap::new()) {
            BuildOutcome::Ready(p) => Arc::new(p),
            other => panic!("expected ready problem, got {other:?}"),
        }
    }

    struct Scripted(BackendStatus);

    impl MilpBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn solve(&self, _problem: &AssignmentProblem) -> Result<BackendStatus, SolverError> {
            Ok(self.0.clone())
        }
    }

    struct Slow;

    impl MilpBackend for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn solve(&self, _problem: &AssignmentProblem) -> Result<BackendStatus, SolverError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(BackendStatus::Infeasible)
        }
    }

    fn adapter(backend: impl MilpBackend, limit_ms: u64) -> SolverAdapter {
        SolverAdapter::new(Arc::new(backend), Duration::from_millis(limit_ms))
    }

    #[tokio::test]
    async fn test_microlp_prefers_cheaper_cluster_under_capacity() {
        let problem = build(
            vec![
                demand("a", 3.0, None, &[(1, 3.0), (2, 6.0)]),
                demand("b", 3.0, None, &[(1, 3.0), (2, 6.0)]),
            ],
            &[cluster(1, 4.0), cluster(2, 10.0)],
        );
        let result = adapter(MicroLpBackend, 10_000).solve(problem).await.unwrap();

        assert_eq!(result.status, SolveStatus::Optimal);
        let candidate = result.candidate.unwrap();
        assert_eq!(candidate.objective, 9.0);
        let on_cheap = candidate
            .assignments
            .values()
            .filter(|c| c.get() == 1)
            .count();
        assert_eq!(on_cheap, 1);
    }

    #[tokio::test]
    async fn test_microlp_reports_infeasible() {
        // Each device fits somewhere alone but not together.
        let problem = build(
            vec![
                demand("a", 3.0, None, &[(1, 1.0), (2, 1.0)]),
                demand("b", 3.0, None, &[(1, 1.0), (2, 1.0)]),
                demand("c", 3.0, None, &[(1, 1.0), (2, 1.0)]),
            ],
            &[cluster(1, 4.0), cluster(2, 5.0)],
        );
        let result = adapter(MicroLpBackend, 10_000).solve(problem).await.unwrap();
        assert_eq!(result.status, SolveStatus::Infeasible);
        assert!(result.candidate.is_none());
    }

    #[tokio::test]
    async fn test_timeout_uses_incumbent() {
        let problem = build(
            vec![demand("a", 1.0, Some(2), &[(1, 1.0), (2, 5.0)])],
            &[cluster(1, 5.0), cluster(2, 5.0)],
        );
        let result = adapter(Slow, 20).solve(problem).await.unwrap();

        assert_eq!(result.status, SolveStatus::Timeout);
        let candidate = result.candidate.unwrap();
        assert_eq!(candidate.assignments.values().next(), Some(&ClusterId::new(2)));
        assert_eq!(candidate.objective, 5.0);
    }

    #[tokio::test]
    async fn test_timeout_without_incumbent_has_no_candidate() {
        let problem = build(
            vec![demand("a", 1.0, None, &[(1, 1.0)])],
            &[cluster(1, 5.0)],
        );
        let result = adapter(Slow, 20).solve(problem).await.unwrap();
        assert_eq!(result.status, SolveStatus::Timeout);
        assert!(result.candidate.is_none());
    }

    #[tokio::test]
    async fn test_invalid_backend_solution_is_rejected() {
        let problem = build(
            vec![
                demand("a", 3.0, None, &[(1, 1.0), (2, 1.0)]),
                demand("b", 3.0, None, &[(1, 1.0), (2, 1.0)]),
            ],
            &[cluster(1, 4.0), cluster(2, 4.0)],
        );

        // Both devices on cluster 1 exceeds its capacity.
        let over = Scripted(BackendStatus::Feasible(vec![1.0, 0.0, 1.0, 0.0]));
        let err = adapter(over, 1_000).solve(Arc::clone(&problem)).await.unwrap_err();
        assert!(matches!(err, SolverError::Verification(_)));

        // Device a selected twice.
        let doubled = Scripted(BackendStatus::Optimal(vec![1.0, 1.0, 0.0, 1.0]));
        let err = adapter(doubled, 1_000).solve(problem).await.unwrap_err();
        assert!(matches!(err, SolverError::Verification(_)));
    }

    #[tokio::test]
    async fn test_feasible_status_is_passed_through() {
        let problem = build(
            vec![demand("a", 1.0, None, &[(1, 1.0), (2, 2.0)])],
            &[cluster(1, 5.0), cluster(2, 5.0)],
        );
        let backend = Scripted(BackendStatus::Feasible(vec![0.0, 1.0]));
        let result = adapter(backend, 1_000).solve(problem).await.unwrap();
        assert_eq!(result.status, SolveStatus::Feasible);
        assert_eq!(result.candidate.unwrap().objective, 2.0);
    }

    /// Exhaustive optimum over every option combination.
    fn brute_force(problem: &AssignmentProblem) -> Option<f64> {
        fn walk(problem: &AssignmentProblem, chosen: &mut Vec<usize>, best: &mut Option<f64>) {
            let depth = chosen.len();
            if depth == problem.devices().len() {
                if problem.check_selection(chosen).is_ok() {
                    let cost = problem.objective(chosen);
                    if best.map_or(true, |b| cost < b) {
                        *best = Some(cost);
                    }
                }
                return;
            }
            for v in problem.devices()[depth].variables.clone() {
                chosen.push(v);
                walk(problem, chosen, best);
                chosen.pop();
            }
        }
        let mut best = None;
        walk(problem, &mut Vec::new(), &mut best);
        best
    }

    fn fleet() -> impl Strategy<Value = (Vec<DeviceDemand>, Vec<Cluster>)> {
        let clusters = prop::collection::vec(1u32..8, 1..4).prop_map(|headrooms| {
            headrooms
                .into_iter()
                .enumerate()
                .map(|(i, h)| cluster(i as i64 + 1, f64::from(h)))
                .collect::<Vec<_>>()
        });
        clusters.prop_flat_map(|clusters| {
            let n = clusters.len();
            let device = (1u32..4, prop::collection::vec((0..n, 1u32..10), 1..=n));
            let devices = prop::collection::vec(device, 1..5).prop_map(|raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, (load, opts))| {
                        let options: Vec<(i64, f64)> = opts
                            .into_iter()
                            .map(|(c, cost)| (c as i64 + 1, f64::from(cost)))
                            .collect();
                        demand(&format!("d{i}"), f64::from(load), None, &options)
                    })
                    .collect::<Vec<_>>()
            });
            (devices, Just(clusters))
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_microlp_solution_is_valid_and_optimal((demands, clusters) in fleet()) {
            let problem = match ProblemBuilder::new(true).build(demands, &clusters, &BTreeMap::new()) {
                BuildOutcome::Ready(p) => p,
                _ => return Ok(()),
            };
            let expected = brute_force(&problem);

            match MicroLpBackend.solve(&problem).unwrap() {
                BackendStatus::Optimal(values) => {
                    let selection = problem.select_from_values(&values).unwrap();
                    prop_assert!(problem.check_selection(&selection).is_ok());
                    let optimum = expected.expect("solver found a solution brute force missed");
                    prop_assert!((problem.objective(&selection) - optimum).abs() < 1e-6);
                }
                BackendStatus::Infeasible => prop_assert!(expected.is_none()),
                BackendStatus::Feasible(_) => prop_assert!(false, "microlp proves optimality"),
            }
        }
    }
}
