//! Energy/carbon cost of placing a device on a cluster.
//!
//! The per-unit cost is a linear blend of the cluster's energy and carbon
//! coefficients, `(1 - w) * energy + w * carbon`, scaled by the device load.
//! A coefficient that carries zero weight is not required.

use edgealloc_id::ClusterId;
use thiserror::Error;

use crate::model::Cluster;

/// Why a (device, cluster) pair could not be costed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CostError {
    #[error("cluster {cluster_id} has no {coefficient} coefficient")]
    MissingCoefficient {
        cluster_id: ClusterId,
        coefficient: &'static str,
    },

    #[error("cluster {cluster_id} has invalid {coefficient} coefficient {value}")]
    InvalidCoefficient {
        cluster_id: ClusterId,
        coefficient: &'static str,
        value: f64,
    },

    #[error("invalid load {0}")]
    InvalidLoad(f64),

    #[error("carbon weight {0} outside [0, 1]")]
    InvalidWeight(f64),
}

/// Blended energy/carbon cost model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    carbon_weight: f64,
}

impl CostModel {
    /// Create a cost model with the given carbon weight in `[0, 1]`.
    pub fn new(carbon_weight: f64) -> Result<Self, CostError> {
        if !(0.0..=1.0).contains(&carbon_weight) {
            return Err(CostError::InvalidWeight(carbon_weight));
        }
        Ok(Self { carbon_weight })
    }

    pub fn carbon_weight(&self) -> f64 {
        self.carbon_weight
    }

    /// Cost of one unit of load on `cluster`.
    pub fn unit_cost(&self, cluster: &Cluster) -> Result<f64, CostError> {
        let energy_weight = 1.0 - self.carbon_weight;
        let energy = weighted_coefficient(
            cluster.id,
            "energy",
            cluster.energy_coefficient,
            energy_weight,
        )?;
        let carbon = weighted_coefficient(
            cluster.id,
            "carbon",
            cluster.carbon_coefficient,
            self.carbon_weight,
        )?;
        Ok(energy + carbon)
    }

    /// Cost of placing `load` on `cluster`.
    pub fn cost(&self, load: f64, cluster: &Cluster) -> Result<f64, CostError> {
        if !load.is_finite() || load < 0.0 {
            return Err(CostError::InvalidLoad(load));
        }
        let cost = load * self.unit_cost(cluster)?;
        if !cost.is_finite() {
            return Err(CostError::InvalidLoad(load));
        }
        Ok(cost)
    }
}

fn weighted_coefficient(
    cluster_id: ClusterId,
    coefficient: &'static str,
    value: Option<f64>,
    weight: f64,
) -> Result<f64, CostError> {
    if weight == 0.0 {
        return Ok(0.0);
    }
    let value = value.ok_or(CostError::MissingCoefficient {
        cluster_id,
        coefficient,
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(CostError::InvalidCoefficient {
            cluster_id,
            coefficient,
            value,
        });
    }
    Ok(weight * value)
}
