//! In-memory assignment store for tests and local dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use edgealloc_id::{ClusterId, DeviceId};
use tokio::sync::Mutex;

use super::{AssignmentStore, StoreError};
use crate::model::Device;

/// Assignment store held in process memory.
#[derive(Default)]
pub struct InMemoryAssignmentStore {
    devices: Mutex<BTreeMap<DeviceId, Device>>,
    failing_devices: Mutex<BTreeSet<DeviceId>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryAssignmentStore {
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        Self {
            devices: Mutex::new(
                devices
                    .into_iter()
                    .map(|d| (d.device_id.clone(), d))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    /// Make every read fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make updates of one device fail with a query-level error.
    pub async fn fail_updates_for(&self, device_id: DeviceId) {
        self.failing_devices.lock().await.insert(device_id);
    }

    /// Overwrite a device's committed cluster, as a concurrent writer would.
    pub async fn set_cluster(&self, device_id: &DeviceId, cluster_id: Option<ClusterId>) {
        if let Some(device) = self.devices.lock().await.get_mut(device_id) {
            device.cluster_id = cluster_id;
        }
    }

    /// Committed cluster per device.
    pub async fn assignments(&self) -> BTreeMap<DeviceId, Option<ClusterId>> {
        self.devices
            .lock()
            .await
            .iter()
            .map(|(id, d)| (id.clone(), d.cluster_id))
            .collect()
    }

    /// Number of successful `update_cluster` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(self.devices.lock().await.values().cloned().collect())
    }

    async fn update_cluster(
        &self,
        device_id: &DeviceId,
        expected: Option<ClusterId>,
        target: ClusterId,
    ) -> Result<(), StoreError> {
        if self.failing_devices.lock().await.contains(device_id) {
            return Err(StoreError::Unavailable(format!(
                "writes to {device_id} are failing"
            )));
        }

        let mut devices = self.devices.lock().await;
        match devices.get_mut(device_id) {
            Some(device) if device.cluster_id == expected => {
                device.cluster_id = Some(target);
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(StoreError::Conflict {
                device_id: device_id.clone(),
            }),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(())
    }
}
