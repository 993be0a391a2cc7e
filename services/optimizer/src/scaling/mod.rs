//! Cluster scaling: planning, transport and concurrent execution.

mod client;
mod mock;
mod orchestrator;
mod plan;

pub use client::HttpScalingClient;
pub use mock::{MockBehavior, MockScalingClient};
pub use orchestrator::ScalingOrchestrator;
pub use plan::{cardinality_for, plan_scaling, ClusterTarget, DeviceMove, FleetLoad, ScalingPlan};

use std::fmt;

use async_trait::async_trait;
use edgealloc_id::ClusterId;
use serde::Serialize;
use thiserror::Error;

/// One resize request for one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingRequest {
    pub cluster_id: ClusterId,
    pub flavour: String,
    /// Base URL of the cluster's scaling frontend.
    pub endpoint: Option<String>,
    pub target_cardinality: u32,
    pub target_load: f64,
}

/// Acknowledgement of a successful resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleAck {
    /// Capacity the cluster reports after scaling, in instances.
    pub achieved_capacity: u32,
}

/// A failed scaling attempt.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("scaling endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid scaling request: {0}")]
    InvalidRequest(String),
}

impl ScaleError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => is_transient_status(*status),
            Self::InvalidRequest(_) => false,
        }
    }
}

/// 408, 429 and every 5xx are worth retrying; other statuses are rejections.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Transport for scaling requests.
#[async_trait]
pub trait ScalingClient: Send + Sync {
    async fn scale(&self, request: &ScalingRequest) -> Result<ScaleAck, ScaleError>;
}

/// Why a cluster did not scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The cluster explicitly refused (e.g. quota exceeded).
    Rejected(String),
    /// Every attempt failed transiently.
    RetriesExhausted(String),
    /// The cycle deadline passed before the request finished.
    DeadlineExceeded,
    /// The inventory has no scaling endpoint for the cluster.
    MissingEndpoint,
    /// The scaling task died.
    TaskFailed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(detail) => write!(f, "rejected: {detail}"),
            Self::RetriesExhausted(detail) => write!(f, "retries exhausted: {detail}"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
            Self::MissingEndpoint => f.write_str("no scaling endpoint"),
            Self::TaskFailed(detail) => write!(f, "task failed: {detail}"),
        }
    }
}

/// Terminal result of scaling one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScalingOutcome {
    Scaled { achieved_capacity: u32, attempts: u32 },
    Failed { reason: FailureReason, attempts: u32 },
}

impl ScalingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Scaled { .. })
    }
}

/// A scaling outcome tagged with its cluster, as streamed to the committer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterOutcome {
    pub cluster_id: ClusterId,
    pub outcome: ScalingOutcome,
}
