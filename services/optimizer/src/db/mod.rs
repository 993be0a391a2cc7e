//! Persisted device → cluster assignments.
//!
//! The store owns nothing but the `device_cluster_assignment` table, whose
//! schema is managed outside this service:
//!
//! | column           | type               |
//! |------------------|--------------------|
//! | `device_id`      | `TEXT PRIMARY KEY` |
//! | `cluster_id`     | `BIGINT NULL`      |
//! | `flavour`        | `TEXT NULL`        |
//! | `app_req_id`     | `BIGINT`           |
//! | `app_req_json`   | `JSONB NULL`       |
//! | `estimated_load` | `DOUBLE PRECISION` |
//! | `last_seen`      | `TIMESTAMPTZ`      |
//!
//! Rows are read in full at the start of every cycle and only `cluster_id`
//! is ever written, one row at a time.

mod assignments;
mod error;
mod memory;

pub use assignments::PgAssignmentStore;
pub use error::StoreError;
pub use memory::InMemoryAssignmentStore;

use std::time::Duration;

use async_trait::async_trait;
use edgealloc_id::{ClusterId, DeviceId};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::model::Device;

/// Access to the persisted assignment table.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Read every device row.
    async fn load_devices(&self) -> Result<Vec<Device>, StoreError>;

    /// Move a device to `target`, provided its committed cluster is still
    /// `expected`.
    ///
    /// Returns [`StoreError::Conflict`] when the row changed or no longer
    /// exists.
    async fn update_cluster(
        &self,
        device_id: &DeviceId,
        expected: Option<ClusterId>,
        target: ClusterId,
    ) -> Result<(), StoreError>;

    /// Check the store is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Connection pool settings for the assignment database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a cycle waits for a pooled connection before the read fails.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/edgealloc".to_string(),
            // One cycle reads once and then writes rows one at a time.
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    /// Read `DATABASE_URL`, `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS` and
    /// `DB_ACQUIRE_TIMEOUT_SECS`. Unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parsed("DB_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            min_connections: parsed("DB_MIN_CONNECTIONS").unwrap_or(defaults.min_connections),
            acquire_timeout: parsed("DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            ..defaults
        }
    }
}

/// Pooled connection to the assignment database.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool. Fails when the first connection cannot be made.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            acquire_timeout_secs = config.acquire_timeout.as_secs(),
            "Connecting to assignment database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn assignment_store(&self) -> PgAssignmentStore {
        PgAssignmentStore::new(self.pool.clone())
    }
}
