//! Hard-constraint filtering of clusters per device.

use std::collections::BTreeSet;

use edgealloc_id::ClusterId;

use crate::model::{ApplicationRequirement, Cluster, ClusterLocation, GeoConstraint};

/// Mean Earth radius (IUGG), in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Clusters satisfying every hard constraint of `requirement`.
pub fn feasible_clusters(
    requirement: &ApplicationRequirement,
    clusters: &[Cluster],
) -> BTreeSet<ClusterId> {
    clusters
        .iter()
        .filter(|cluster| is_feasible(requirement, cluster))
        .map(|cluster| cluster.id)
        .collect()
}

/// Whether a single cluster satisfies the requirement.
pub fn is_feasible(requirement: &ApplicationRequirement, cluster: &Cluster) -> bool {
    cluster.flavour == requirement.flavour
        && cluster.confidentiality >= requirement.confidentiality
        && (requirement.providers.is_empty() || requirement.providers.contains(&cluster.provider))
        && satisfies_geolocation(requirement.geolocation.as_ref(), &cluster.location)
}

fn satisfies_geolocation(constraint: Option<&GeoConstraint>, location: &ClusterLocation) -> bool {
    match constraint {
        None => true,
        Some(GeoConstraint::Region { region }) => location.region.as_deref() == Some(region),
        Some(GeoConstraint::Radius {
            latitude,
            longitude,
            radius_km,
        }) => match (location.latitude, location.longitude) {
            (Some(lat), Some(lon)) => {
                haversine_km(*latitude, *longitude, lat, lon) <= *radius_km
            }
            // A cluster with unknown coordinates cannot prove it is in range.
            _ => false,
        },
    }
}

/// Great-circle distance between two points given in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}
