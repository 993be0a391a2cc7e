//! Cluster-management platform access.
//!
//! The platform owns application requirements and the cluster inventory.
//! Both are fetched fresh every cycle.

mod http;

pub use http::HttpPlatformClient;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use edgealloc_id::AppReqId;
use thiserror::Error;

use crate::model::{ApplicationRequirement, Cluster};

/// Platform access errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("platform returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the cluster-management platform.
#[async_trait]
pub trait ClusterPlatform: Send + Sync {
    /// Full cluster inventory.
    async fn list_clusters(&self) -> Result<Vec<Cluster>, PlatformError>;

    /// One application requirement; `None` if the platform no longer knows
    /// it.
    async fn get_requirement(
        &self,
        id: AppReqId,
    ) -> Result<Option<ApplicationRequirement>, PlatformError>;
}

/// Platform answering from fixed data.
#[derive(Debug, Default)]
pub struct StaticPlatform {
    clusters: Vec<Cluster>,
    requirements: BTreeMap<AppReqId, ApplicationRequirement>,
    unavailable: AtomicBool,
}

impl StaticPlatform {
    pub fn new(
        clusters: Vec<Cluster>,
        requirements: impl IntoIterator<Item = ApplicationRequirement>,
    ) -> Self {
        Self {
            clusters,
            requirements: requirements.into_iter().map(|r| (r.id, r)).collect(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every call fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), PlatformError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable(
                "platform marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterPlatform for StaticPlatform {
    async fn list_clusters(&self) -> Result<Vec<Cluster>, PlatformError> {
        self.check_available()?;
        Ok(self.clusters.clone())
    }

    async fn get_requirement(
        &self,
        id: AppReqId,
    ) -> Result<Option<ApplicationRequirement>, PlatformError> {
        self.check_available()?;
        Ok(self.requirements.get(&id).cloned())
    }
}
