//! Which clusters must scale, and to what size.
//!
//! A cluster is affected when its membership changes (it gains or loses a
//! device) or when the cardinality implied by its post-cycle load differs
//! from the one implied by its pre-cycle committed load.
//!
//! Scaling runs in two phases. Clusters gaining devices grow first, to a
//! size that still hosts every device leaving them. Capacity is released
//! only once the moves out of a cluster are committed, so a failed scale-up
//! never leaves a held-back device on a shrunk cluster.

use std::collections::BTreeMap;

use edgealloc_id::{ClusterId, DeviceId};
use serde::Serialize;

use tracing::warn;

use super::{ScalingOutcome, ScalingRequest};
use crate::model::Cluster;

/// Tolerance below which a fractional instance is not rounded up.
const CARDINALITY_EPSILON: f64 = 1e-9;

/// A device's committed placement and the load it occupies.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetLoad {
    pub device_id: DeviceId,
    pub committed: Option<ClusterId>,
    pub load: f64,
}

/// A device whose candidate cluster differs from its committed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceMove {
    pub device_id: DeviceId,
    pub from: Option<ClusterId>,
    pub to: ClusterId,
}

/// Scaling target of one affected cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterTarget {
    pub cluster_id: ClusterId,
    pub current_load: f64,
    pub target_load: f64,
    pub current_cardinality: u32,
    pub target_cardinality: u32,
    /// Committed load plus every arrival; held until departures commit.
    pub holding_load: f64,
    pub holding_cardinality: u32,
    pub gained: usize,
    pub lost: usize,
}

impl ClusterTarget {
    fn is_affected(&self) -> bool {
        self.gained > 0 || self.lost > 0 || self.current_cardinality != self.target_cardinality
    }
}

/// The scaling work implied by a candidate assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalingPlan {
    /// Affected clusters ordered by id.
    pub targets: Vec<ClusterTarget>,
    /// Devices changing cluster, ordered by device id.
    pub moves: Vec<DeviceMove>,
    /// Candidate devices already on their target cluster.
    pub unchanged: usize,
    move_loads: BTreeMap<DeviceId, f64>,
    load_per_instance: f64,
}

impl ScalingPlan {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Moves whose destination is `cluster_id`.
    pub fn moves_into(&self, cluster_id: ClusterId) -> impl Iterator<Item = &DeviceMove> {
        self.moves.iter().filter(move |m| m.to == cluster_id)
    }

    /// First-phase requests: every cluster gaining devices, sized to its
    /// holding cardinality. Clusters missing from the inventory get no
    /// endpoint and fail without a request.
    pub fn scale_up_requests(&self, clusters: &[Cluster]) -> Vec<ScalingRequest> {
        let inventory = index(clusters);

        self.targets
            .iter()
            .filter(|target| target.gained > 0)
            .map(|target| {
                let cluster = inventory.get(&target.cluster_id);
                ScalingRequest {
                    cluster_id: target.cluster_id,
                    flavour: cluster.map(|c| c.flavour.clone()).unwrap_or_default(),
                    endpoint: cluster.and_then(|c| c.scaling_endpoint.clone()),
                    target_cardinality: target.holding_cardinality,
                    target_load: target.holding_load,
                }
            })
            .collect()
    }

    /// Second-phase requests: shrink clusters to the load they host once
    /// `committed` is applied.
    ///
    /// A cluster's current size is its scale-up outcome when it scaled, and
    /// its pre-cycle cardinality otherwise. Sources without a scaling
    /// endpoint keep their capacity.
    pub fn scale_down_requests(
        &self,
        clusters: &[Cluster],
        scaled_up: &BTreeMap<ClusterId, ScalingOutcome>,
        committed: &[DeviceMove],
    ) -> Vec<ScalingRequest> {
        let inventory = index(clusters);
        let load_of = |m: &DeviceMove| self.move_loads.get(&m.device_id).copied().unwrap_or(0.0);
        let mut requests = Vec::new();

        for target in &self.targets {
            let cluster_id = target.cluster_id;
            let arrived: f64 = committed.iter().filter(|m| m.to == cluster_id).map(load_of).sum();
            let departed: f64 = committed
                .iter()
                .filter(|m| m.from == Some(cluster_id))
                .map(load_of)
                .sum();
            let realized_load = (target.current_load + arrived - departed).max(0.0);
            let realized = cardinality_for(realized_load, self.load_per_instance);

            let size = match scaled_up.get(&cluster_id) {
                Some(ScalingOutcome::Scaled {
                    achieved_capacity, ..
                }) => *achieved_capacity,
                _ => target.current_cardinality,
            };
            if realized >= size {
                continue;
            }

            let Some(cluster) = inventory.get(&cluster_id) else {
                warn!(
                    cluster_id = %cluster_id,
                    "Vacated cluster is not in the inventory, keeping its capacity"
                );
                continue;
            };
            let Some(endpoint) = cluster.scaling_endpoint.clone() else {
                warn!(
                    cluster_id = %cluster_id,
                    "Vacated cluster has no scaling endpoint, keeping its capacity"
                );
                continue;
            };
            requests.push(ScalingRequest {
                cluster_id,
                flavour: cluster.flavour.clone(),
                endpoint: Some(endpoint),
                target_cardinality: realized,
                target_load: realized_load,
            });
        }

        requests
    }
}

fn index(clusters: &[Cluster]) -> BTreeMap<ClusterId, &Cluster> {
    clusters.iter().map(|c| (c.id, c)).collect()
}

/// Instances needed to host `load`.
pub fn cardinality_for(load: f64, load_per_instance: f64) -> u32 {
    if !load.is_finite() || load <= 0.0 || load_per_instance <= 0.0 {
        return 0;
    }
    (load / load_per_instance - CARDINALITY_EPSILON).ceil().max(0.0) as u32
}

/// Compare committed and candidate placements.
///
/// Devices absent from `candidate` keep their committed cluster.
pub fn plan_scaling(
    fleet: &[FleetLoad],
    candidate: &BTreeMap<DeviceId, ClusterId>,
    load_per_instance: f64,
) -> ScalingPlan {
    #[derive(Default)]
    struct Tally {
        before: f64,
        after: f64,
        arrived: f64,
        gained: usize,
        lost: usize,
    }

    let mut tallies: BTreeMap<ClusterId, Tally> = BTreeMap::new();
    let mut moves = Vec::new();
    let mut move_loads = BTreeMap::new();
    let mut unchanged = 0;

    for device in fleet {
        let target = candidate.get(&device.device_id).copied().or(device.committed);

        if let Some(current) = device.committed {
            tallies.entry(current).or_default().before += device.load;
        }
        if let Some(target) = target {
            tallies.entry(target).or_default().after += device.load;
        }

        match (device.committed, target) {
            (from, Some(to)) if from != Some(to) => {
                if let Some(from) = from {
                    tallies.entry(from).or_default().lost += 1;
                }
                let tally = tallies.entry(to).or_default();
                tally.gained += 1;
                tally.arrived += device.load;
                move_loads.insert(device.device_id.clone(), device.load);
                moves.push(DeviceMove {
                    device_id: device.device_id.clone(),
                    from,
                    to,
                });
            }
            _ if candidate.contains_key(&device.device_id) => unchanged += 1,
            _ => {}
        }
    }

    moves.sort_by(|a, b| a.device_id.cmp(&b.device_id));

    let targets = tallies
        .into_iter()
        .map(|(cluster_id, tally)| ClusterTarget {
            cluster_id,
            current_load: tally.before,
            target_load: tally.after,
            current_cardinality: cardinality_for(tally.before, load_per_instance),
            target_cardinality: cardinality_for(tally.after, load_per_instance),
            holding_load: tally.before + tally.arrived,
            holding_cardinality: cardinality_for(tally.before + tally.arrived, load_per_instance),
            gained: tally.gained,
            lost: tally.lost,
        })
        .filter(ClusterTarget::is_affected)
        .collect();

    ScalingPlan {
        targets,
        moves,
        unchanged,
        move_loads,
        load_per_instance,
    }
}
