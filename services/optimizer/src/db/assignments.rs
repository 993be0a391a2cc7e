//! Postgres-backed assignment store.

use async_trait::async_trait;
use edgealloc_id::{AppReqId, ClusterId, DeviceId};
use sqlx::{postgres::PgPool, postgres::PgRow, Row};
use tracing::{debug, instrument};

use super::{AssignmentStore, StoreError};
use crate::model::Device;

impl<'r> sqlx::FromRow<'r, PgRow> for Device {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let device_id: String = row.try_get("device_id")?;
        let device_id =
            DeviceId::parse(device_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let cluster_id: Option<i64> = row.try_get("cluster_id")?;
        let app_req_id: i64 = row.try_get("app_req_id")?;

        Ok(Self {
            device_id,
            cluster_id: cluster_id.map(ClusterId::new),
            flavour: row.try_get("flavour")?,
            app_req_id: AppReqId::new(app_req_id),
            app_req_snapshot: row.try_get("app_req_json")?,
            estimated_load: row.try_get("estimated_load")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

/// Assignment store over the `device_cluster_assignment` table.
#[derive(Clone)]
pub struct PgAssignmentStore {
    pool: PgPool,
}

impl PgAssignmentStore {
    /// Create a new assignment store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentStore for PgAssignmentStore {
    #[instrument(skip(self))]
    async fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        let devices = sqlx::query_as::<_, Device>(
            r#"
            SELECT device_id, cluster_id, flavour, app_req_id, app_req_json,
                   estimated_load, last_seen
            FROM device_cluster_assignment
            ORDER BY device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        debug!(count = devices.len(), "Loaded device assignments");
        Ok(devices)
    }

    #[instrument(skip(self), fields(device_id = %device_id))]
    async fn update_cluster(
        &self,
        device_id: &DeviceId,
        expected: Option<ClusterId>,
        target: ClusterId,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE device_cluster_assignment
            SET cluster_id = $2
            WHERE device_id = $1 AND cluster_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(device_id.as_str())
        .bind(target.get())
        .bind(expected.map(|c| c.get()))
        .execute(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                device_id: device_id.clone(),
            });
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(())
    }
}
