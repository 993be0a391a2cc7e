//! Shared fixtures for optimizer integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use edgealloc_id::{AppReqId, ClusterId, DeviceId};
use edgealloc_optimizer::config::CapacityConfig;
use edgealloc_optimizer::cycle::{CycleRunner, CycleSettings};
use edgealloc_optimizer::db::InMemoryAssignmentStore;
use edgealloc_optimizer::model::{
    ApplicationRequirement, Cluster, ClusterLocation, Confidentiality, Device,
};
use edgealloc_optimizer::placement::{CostModel, MicroLpBackend, SolverAdapter};
use edgealloc_optimizer::platform::StaticPlatform;
use edgealloc_optimizer::scaling::{MockScalingClient, ScalingOrchestrator};
use edgealloc_reconcile::{BackoffPolicy, RetryPolicy};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,edgealloc_optimizer=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn did(id: &str) -> DeviceId {
    DeviceId::parse(id).unwrap()
}

pub fn cid(id: i64) -> ClusterId {
    ClusterId::new(id)
}

/// A cluster whose energy and carbon coefficients both equal `unit_cost`,
/// so the blended cost per unit of load is `unit_cost` for any weight.
pub fn cluster(id: i64, flavour: &str, headroom: f64, unit_cost: f64) -> Cluster {
    Cluster {
        id: cid(id),
        name: format!("cluster-{id}"),
        flavour: flavour.to_string(),
        confidentiality: Confidentiality::Public,
        provider: "edge".to_string(),
        location: ClusterLocation {
            region: Some("eu-south".to_string()),
            latitude: Some(43.263),
            longitude: Some(-2.935),
        },
        headroom,
        energy_coefficient: Some(unit_cost),
        carbon_coefficient: Some(unit_cost),
        scaling_endpoint: Some(format!("http://cluster-{id}.test")),
    }
}

pub fn requirement(id: i64, flavour: &str) -> ApplicationRequirement {
    ApplicationRequirement {
        id: AppReqId::new(id),
        flavour: flavour.to_string(),
        confidentiality: Confidentiality::Public,
        providers: BTreeSet::new(),
        geolocation: None,
        resource_demand: None,
    }
}

pub fn device(id: &str, app_req: i64, load: f64, cluster: Option<i64>) -> Device {
    Device {
        device_id: did(id),
        cluster_id: cluster.map(cid),
        flavour: None,
        app_req_id: AppReqId::new(app_req),
        app_req_snapshot: None,
        estimated_load: load,
        last_seen: Utc::now(),
    }
}

pub fn settings() -> CycleSettings {
    CycleSettings {
        cost_model: CostModel::new(0.5).unwrap(),
        capacity: CapacityConfig::default(),
        load_per_instance: 1.0,
        stale_after: Duration::from_secs(30 * 86_400),
        max_duration: Duration::from_secs(120),
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(
        2,
        BackoffPolicy::fixed(Duration::from_millis(5), Duration::from_millis(20)),
    )
    .unwrap()
}

pub fn solver() -> SolverAdapter {
    SolverAdapter::new(Arc::new(MicroLpBackend), Duration::from_secs(30))
}

/// In-memory store, static platform and scripted scaling behind a runner.
pub struct Harness {
    pub store: Arc<InMemoryAssignmentStore>,
    pub platform: Arc<StaticPlatform>,
    pub scaling: Arc<MockScalingClient>,
    pub runner: CycleRunner,
}

pub fn harness(
    devices: Vec<Device>,
    clusters: Vec<Cluster>,
    requirements: Vec<ApplicationRequirement>,
    settings: CycleSettings,
) -> Harness {
    let store = Arc::new(InMemoryAssignmentStore::new(devices));
    let platform = Arc::new(StaticPlatform::new(clusters, requirements));
    let scaling = Arc::new(MockScalingClient::new());
    let runner = CycleRunner::new(
        store.clone(),
        platform.clone(),
        solver(),
        ScalingOrchestrator::new(scaling.clone(), fast_retry()),
        settings,
    );

    Harness {
        store,
        platform,
        scaling,
        runner,
    }
}

/// D1 (flavour A, load 10) and D2 (flavour B, load 5), both unplaced;
/// C1 (A, headroom 10, cost 2) and C2 (B, headroom 5, cost 3).
pub fn two_device_fleet() -> (Vec<Device>, Vec<Cluster>, Vec<ApplicationRequirement>) {
    (
        vec![device("d1", 1, 10.0, None), device("d2", 2, 5.0, None)],
        vec![cluster(1, "A", 10.0, 2.0), cluster(2, "B", 5.0, 3.0)],
        vec![requirement(1, "A"), requirement(2, "B")],
    )
}
