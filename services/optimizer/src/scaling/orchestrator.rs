//! Concurrent fan-out of scaling requests.
//!
//! One task per affected cluster. Each task retries transient failures under
//! the configured policy. Outcomes are streamed as they resolve and the full
//! set is returned once every cluster is terminal. When the cycle deadline
//! passes, in-flight tasks are aborted and their clusters reported as
//! `DeadlineExceeded`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use edgealloc_id::ClusterId;
use edgealloc_reconcile::{retry_with_policy, AttemptError, RetryOutcome, RetryPolicy};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::{ClusterOutcome, FailureReason, ScalingClient, ScalingOutcome, ScalingRequest};

/// Issues scaling requests concurrently and collects their outcomes.
#[derive(Clone)]
pub struct ScalingOrchestrator {
    client: Arc<dyn ScalingClient>,
    retry: RetryPolicy,
}

impl ScalingOrchestrator {
    pub fn new(client: Arc<dyn ScalingClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Scale every requested cluster, streaming each outcome to `outcomes`
    /// as soon as it is known.
    #[instrument(skip_all, fields(clusters = requests.len()))]
    pub async fn execute(
        &self,
        requests: Vec<ScalingRequest>,
        deadline: Instant,
        outcomes: mpsc::UnboundedSender<ClusterOutcome>,
    ) -> BTreeMap<ClusterId, ScalingOutcome> {
        let mut results = BTreeMap::new();
        let mut pending = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for request in requests {
            let cluster_id = request.cluster_id;
            if request.endpoint.is_none() {
                warn!(cluster_id = %cluster_id, "Cluster has no scaling endpoint");
                let outcome = ScalingOutcome::Failed {
                    reason: FailureReason::MissingEndpoint,
                    attempts: 0,
                };
                record(&outcomes, &mut results, cluster_id, outcome);
                continue;
            }

            let client = Arc::clone(&self.client);
            let retry = self.retry.clone();
            pending.insert(cluster_id);
            tasks.spawn(async move {
                let outcome = scale_cluster(client.as_ref(), &retry, &request).await;
                (cluster_id, outcome)
            });
        }

        let mut deadline_hit = false;
        while !tasks.is_empty() {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((cluster_id, outcome)))) => {
                    pending.remove(&cluster_id);
                    record(&outcomes, &mut results, cluster_id, outcome);
                }
                Ok(Some(Err(e))) => {
                    error!(error = %e, "Scaling task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        in_flight = pending.len(),
                        "Cycle deadline reached, aborting in-flight scaling"
                    );
                    deadline_hit = true;
                    tasks.shutdown().await;
                    break;
                }
            }
        }

        for cluster_id in pending {
            let reason = if deadline_hit {
                FailureReason::DeadlineExceeded
            } else {
                FailureReason::TaskFailed("scaling task ended without an outcome".to_string())
            };
            let outcome = ScalingOutcome::Failed {
                reason,
                attempts: 0,
            };
            record(&outcomes, &mut results, cluster_id, outcome);
        }

        results
    }
}

fn record(
    outcomes: &mpsc::UnboundedSender<ClusterOutcome>,
    results: &mut BTreeMap<ClusterId, ScalingOutcome>,
    cluster_id: ClusterId,
    outcome: ScalingOutcome,
) {
    // The committer may already be gone (dry run, or it failed); the
    // returned map stays authoritative.
    let _ = outcomes.send(ClusterOutcome {
        cluster_id,
        outcome: outcome.clone(),
    });
    results.insert(cluster_id, outcome);
}

async fn scale_cluster(
    client: &dyn ScalingClient,
    retry: &RetryPolicy,
    request: &ScalingRequest,
) -> ScalingOutcome {
    let outcome = retry_with_policy(retry, |_attempt| async move {
        client.scale(request).await.map_err(|e| {
            if e.is_transient() {
                AttemptError::Transient(e)
            } else {
                AttemptError::Terminal(e)
            }
        })
    })
    .await;

    match outcome {
        RetryOutcome::Succeeded { value, attempts } => {
            if value.achieved_capacity < request.target_cardinality {
                warn!(
                    cluster_id = %request.cluster_id,
                    target = request.target_cardinality,
                    achieved = value.achieved_capacity,
                    "Cluster scaled below target"
                );
            }
            info!(
                cluster_id = %request.cluster_id,
                achieved = value.achieved_capacity,
                attempts,
                "Cluster scaled"
            );
            ScalingOutcome::Scaled {
                achieved_capacity: value.achieved_capacity,
                attempts,
            }
        }
        RetryOutcome::Rejected { error, attempts } => {
            warn!(cluster_id = %request.cluster_id, error = %error, attempts, "Scaling rejected");
            ScalingOutcome::Failed {
                reason: FailureReason::Rejected(error.to_string()),
                attempts,
            }
        }
        RetryOutcome::Exhausted { error, attempts } => {
            warn!(
                cluster_id = %request.cluster_id,
                error = %error,
                attempts,
                "Scaling retries exhausted"
            );
            ScalingOutcome::Failed {
                reason: FailureReason::RetriesExhausted(error.to_string()),
                attempts,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::{MockBehavior, MockScalingClient};
    use edgealloc_reconcile::BackoffPolicy;
    use std::time::Duration;

    fn request(id: i64, endpoint: bool) -> ScalingRequest {
        ScalingRequest {
            cluster_id: ClusterId::new(id),
            flavour: "A".to_string(),
            endpoint: endpoint.then(|| format!("http://c{id}")),
            target_cardinality: 2,
            target_load: 2.0,
        }
    }

    fn orchestrator(client: Arc<MockScalingClient>) -> ScalingOrchestrator {
        let retry = RetryPolicy::new(
            3,
            BackoffPolicy::fixed(Duration::from_millis(100), Duration::from_secs(1)),
        )
        .unwrap();
        ScalingOrchestrator::new(client, retry)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_block_others() {
        let client = Arc::new(MockScalingClient::new());
        client
            .set_behavior(ClusterId::new(2), MockBehavior::Reject { status: 403 })
            .await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let results = orchestrator(Arc::clone(&client))
            .execute(vec![request(1, true), request(2, true)], far_deadline(), tx)
            .await;

        assert!(results[&ClusterId::new(1)].is_success());
        assert!(matches!(
            results[&ClusterId::new(2)],
            ScalingOutcome::Failed {
                reason: FailureReason::Rejected(_),
                attempts: 1
            }
        ));
        // Rejections are never retried.
        assert_eq!(client.attempts(ClusterId::new(2)).await, 1);

        let mut streamed = Vec::new();
        while let Some(outcome) = rx.recv().await {
            streamed.push(outcome.cluster_id);
        }
        streamed.sort();
        assert_eq!(streamed, vec![ClusterId::new(1), ClusterId::new(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let client = Arc::new(MockScalingClient::new());
        client
            .set_behavior(
                ClusterId::new(1),
                MockBehavior::FailTimes {
                    failures: 2,
                    status: 503,
                },
            )
            .await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let results = orchestrator(Arc::clone(&client))
            .execute(vec![request(1, true)], far_deadline(), tx)
            .await;

        assert_eq!(
            results[&ClusterId::new(1)],
            ScalingOutcome::Scaled {
                achieved_capacity: 2,
                attempts: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let client = Arc::new(MockScalingClient::new());
        client
            .set_behavior(
                ClusterId::new(1),
                MockBehavior::FailTimes {
                    failures: 10,
                    status: 429,
                },
            )
            .await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let results = orchestrator(Arc::clone(&client))
            .execute(vec![request(1, true)], far_deadline(), tx)
            .await;

        assert!(matches!(
            results[&ClusterId::new(1)],
            ScalingOutcome::Failed {
                reason: FailureReason::RetriesExhausted(_),
                attempts: 3
            }
        ));
        assert_eq!(client.attempts(ClusterId::new(1)).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_endpoint_fails_without_request() {
        let client = Arc::new(MockScalingClient::new());
        let (tx, _rx) = mpsc::unbounded_channel();

        let results = orchestrator(Arc::clone(&client))
            .execute(vec![request(1, false)], far_deadline(), tx)
            .await;

        assert_eq!(
            results[&ClusterId::new(1)],
            ScalingOutcome::Failed {
                reason: FailureReason::MissingEndpoint,
                attempts: 0
            }
        );
        assert!(client.requests().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_in_flight_clusters() {
        let client = Arc::new(MockScalingClient::new());
        client
            .set_behavior(
                ClusterId::new(2),
                MockBehavior::Delay(Duration::from_secs(600)),
            )
            .await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let deadline = Instant::now() + Duration::from_secs(30);

        let results = orchestrator(Arc::clone(&client))
            .execute(vec![request(1, true), request(2, true)], deadline, tx)
            .await;

        assert!(results[&ClusterId::new(1)].is_success());
        assert_eq!(
            results[&ClusterId::new(2)],
            ScalingOutcome::Failed {
                reason: FailureReason::DeadlineExceeded,
                attempts: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_plan_returns_immediately() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let results = orchestrator(Arc::new(MockScalingClient::new()))
            .execute(vec![], far_deadline(), tx)
            .await;
        assert!(results.is_empty());
    }
}
