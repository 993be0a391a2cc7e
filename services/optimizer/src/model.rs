//! Fleet domain types.
//!
//! Devices come from the assignment store, requirements and clusters from the
//! cluster-management platform. All of them are snapshots for one cycle: the
//! optimizer never keeps them across cycles.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use edgealloc_id::{AppReqId, ClusterId, DeviceId};
use serde::{Deserialize, Serialize};

/// A device row as read from the assignment store.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub device_id: DeviceId,

    /// Committed cluster, if the device has been placed before.
    pub cluster_id: Option<ClusterId>,

    /// Flavour recorded by the frontend when the device registered.
    pub flavour: Option<String>,

    pub app_req_id: AppReqId,

    /// Requirement snapshot cached by the frontend. Informational only: the
    /// optimizer always fetches the requirement fresh.
    pub app_req_snapshot: Option<serde_json::Value>,

    /// Demand weight in instance units.
    pub estimated_load: f64,

    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Load used for optimization.
    ///
    /// Prefers the device's own estimate and falls back to the requirement's
    /// declared demand. Returns `None` when neither is a finite positive
    /// number.
    pub fn effective_load(&self, requirement: &ApplicationRequirement) -> Option<f64> {
        if is_positive(self.estimated_load) {
            return Some(self.estimated_load);
        }
        requirement.resource_demand.filter(|d| is_positive(*d))
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Confidentiality tier, ordered from least to most protected.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidentiality {
    #[default]
    Public,
    Restricted,
    Confidential,
}

impl fmt::Display for Confidentiality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Public => "public",
            Self::Restricted => "restricted",
            Self::Confidential => "confidential",
        };
        f.write_str(s)
    }
}

/// Where a device's workload is allowed to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeoConstraint {
    /// Cluster must be in the named region.
    Region { region: String },

    /// Cluster must be within `radius_km` of the point.
    Radius {
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    },
}

/// Structured application requirement owned by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRequirement {
    pub id: AppReqId,

    pub flavour: String,

    #[serde(default)]
    pub confidentiality: Confidentiality,

    /// Allowed providers; empty means unrestricted.
    #[serde(default)]
    pub providers: BTreeSet<String>,

    #[serde(default)]
    pub geolocation: Option<GeoConstraint>,

    /// Declared demand in instance units.
    #[serde(default)]
    pub resource_demand: Option<f64>,
}

/// Physical location of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterLocation {
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,
}

/// A compute cluster from the platform inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,

    #[serde(default)]
    pub name: String,

    pub flavour: String,

    #[serde(default)]
    pub confidentiality: Confidentiality,

    pub provider: String,

    #[serde(default)]
    pub location: ClusterLocation,

    /// Load the cluster can take from optimizer-managed devices, in instance
    /// units.
    pub headroom: f64,

    /// Energy cost per unit of load.
    #[serde(default)]
    pub energy_coefficient: Option<f64>,

    /// Carbon cost per unit of load.
    #[serde(default)]
    pub carbon_coefficient: Option<f64>,

    /// Base URL of the cluster's scaling frontend.
    #[serde(default)]
    pub scaling_endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(load: f64) -> Device {
        Device {
            device_id: DeviceId::parse("d1").unwrap(),
            cluster_id: None,
            flavour: None,
            app_req_id: AppReqId::new(1),
            app_req_snapshot: None,
            estimated_load: load,
            last_seen: Utc::now(),
        }
    }

    fn requirement(demand: Option<f64>) -> ApplicationRequirement {
        ApplicationRequirement {
            id: AppReqId::new(1),
            flavour: "A".to_string(),
            confidentiality: Confidentiality::Public,
            providers: BTreeSet::new(),
            geolocation: None,
            resource_demand: demand,
        }
    }

    #[test]
    fn test_effective_load_prefers_estimate() {
        assert_eq!(device(2.5).effective_load(&requirement(Some(4.0))), Some(2.5));
    }

    #[test]
    fn test_effective_load_falls_back_to_demand() {
        assert_eq!(device(0.0).effective_load(&requirement(Some(4.0))), Some(4.0));
        assert_eq!(
            device(f64::NAN).effective_load(&requirement(Some(4.0))),
            Some(4.0)
        );
    }

    #[test]
    fn test_effective_load_none_when_unusable() {
        assert_eq!(device(-1.0).effective_load(&requirement(None)), None);
        assert_eq!(device(0.0).effective_load(&requirement(Some(0.0))), None);
    }

    #[test]
    fn test_confidentiality_ordering() {
        assert!(Confidentiality::Public < Confidentiality::Restricted);
        assert!(Confidentiality::Restricted < Confidentiality::Confidential);
    }

    #[test]
    fn test_requirement_deserializes_with_defaults() {
        let req: ApplicationRequirement = serde_json::from_value(serde_json::json!({
            "id": 7,
            "flavour": "gpu",
            "geolocation": { "kind": "radius", "latitude": 43.3, "longitude": -2.9, "radius_km": 50.0 }
        }))
        .unwrap();

        assert_eq!(req.id, AppReqId::new(7));
        assert_eq!(req.confidentiality, Confidentiality::Public);
        assert!(req.providers.is_empty());
        assert!(matches!(req.geolocation, Some(GeoConstraint::Radius { .. })));
    }

    #[test]
    fn test_cluster_deserializes_with_missing_coefficients() {
        let cluster: Cluster = serde_json::from_value(serde_json::json!({
            "id": 3,
            "flavour": "gpu",
            "provider": "ovh",
            "headroom": 8.0,
            "confidentiality": "confidential"
        }))
        .unwrap();

        assert_eq!(cluster.energy_coefficient, None);
        assert_eq!(cluster.confidentiality, Confidentiality::Confidential);
        assert_eq!(cluster.location, ClusterLocation::default());
    }
}
