//! Assignment store error types.

use edgealloc_id::DeviceId;
use thiserror::Error;

/// Assignment store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// The row changed or disappeared since it was read.
    #[error("device {device_id} changed concurrently; assignment not updated")]
    Conflict { device_id: DeviceId },

    /// The store cannot serve requests.
    #[error("assignment store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
