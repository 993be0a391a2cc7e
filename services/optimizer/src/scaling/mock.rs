//! Scripted scaling client for tests and dry runs.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use edgealloc_id::ClusterId;
use tokio::sync::Mutex;
use tracing::info;

use super::{ScaleAck, ScaleError, ScalingClient, ScalingRequest};

/// How the mock answers for one cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Scale to exactly the requested cardinality.
    Accept,
    /// Always refuse with `status`.
    Reject { status: u16 },
    /// Fail the first `failures` attempts with `status`, then accept.
    FailTimes { failures: u32, status: u16 },
    /// Accept after sleeping.
    Delay(Duration),
}

/// Scaling client answering from per-cluster scripts. Unscripted clusters
/// accept.
#[derive(Debug, Default)]
pub struct MockScalingClient {
    behaviors: Mutex<BTreeMap<ClusterId, MockBehavior>>,
    attempts: Mutex<BTreeMap<ClusterId, u32>>,
    requests: Mutex<Vec<ScalingRequest>>,
}

impl MockScalingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_behavior(&self, cluster_id: ClusterId, behavior: MockBehavior) {
        self.behaviors.lock().await.insert(cluster_id, behavior);
    }

    /// Attempts received for a cluster.
    pub async fn attempts(&self, cluster_id: ClusterId) -> u32 {
        self.attempts.lock().await.get(&cluster_id).copied().unwrap_or(0)
    }

    /// Every request received, in arrival order.
    pub async fn requests(&self) -> Vec<ScalingRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ScalingClient for MockScalingClient {
    async fn scale(&self, request: &ScalingRequest) -> Result<ScaleAck, ScaleError> {
        self.requests.lock().await.push(request.clone());
        let attempt = {
            let mut attempts = self.attempts.lock().await;
            let n = attempts.entry(request.cluster_id).or_default();
            *n += 1;
            *n
        };
        let behavior = self
            .behaviors
            .lock()
            .await
            .get(&request.cluster_id)
            .cloned()
            .unwrap_or(MockBehavior::Accept);

        info!(
            cluster_id = %request.cluster_id,
            target = request.target_cardinality,
            attempt,
            "[MOCK] Scaling cluster"
        );

        let accept = ScaleAck {
            achieved_capacity: request.target_cardinality,
        };
        match behavior {
            MockBehavior::Accept => Ok(accept),
            MockBehavior::Reject { status } => Err(ScaleError::Status {
                status,
                body: "rejected by mock".to_string(),
            }),
            MockBehavior::FailTimes { failures, status } if attempt <= failures => {
                Err(ScaleError::Status {
                    status,
                    body: format!("mock failure {attempt}/{failures}"),
                })
            }
            MockBehavior::FailTimes { .. } => Ok(accept),
            MockBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(accept)
            }
        }
    }
}
