//! Incremental commit of realized assignments.
//!
//! A device's `cluster_id` is written only after its destination cluster
//! confirms scaling. Commits happen as outcomes arrive, one row at a time,
//! with no surrounding transaction: a failed write is reported and the
//! remaining devices proceed.

use std::collections::BTreeMap;
use std::sync::Arc;

use edgealloc_id::{ClusterId, DeviceId};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::db::AssignmentStore;
use crate::scaling::{ClusterOutcome, DeviceMove};

/// A device whose new assignment could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitFailure {
    pub device_id: DeviceId,
    pub cluster_id: ClusterId,
    /// The row changed concurrently.
    pub conflict: bool,
    pub error: String,
}

/// What the committer did during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Moves written to the store.
    pub committed: Vec<DeviceMove>,
    /// Moves kept at their prior cluster because the destination did not
    /// scale.
    pub held_back: Vec<DeviceMove>,
    pub failures: Vec<CommitFailure>,
}

/// Applies candidate moves whose destination scaled successfully.
#[derive(Clone)]
pub struct AssignmentCommitter {
    store: Arc<dyn AssignmentStore>,
}

impl AssignmentCommitter {
    pub fn new(store: Arc<dyn AssignmentStore>) -> Self {
        Self { store }
    }

    /// Consume scaling outcomes until the sender closes.
    ///
    /// Moves whose destination never reports an outcome are held back.
    #[instrument(skip_all, fields(moves = moves.len()))]
    pub async fn run(
        &self,
        moves: Vec<DeviceMove>,
        mut outcomes: mpsc::UnboundedReceiver<ClusterOutcome>,
    ) -> CommitReport {
        let mut by_destination: BTreeMap<ClusterId, Vec<DeviceMove>> = BTreeMap::new();
        for m in moves {
            by_destination.entry(m.to).or_default().push(m);
        }

        let mut report = CommitReport::default();

        while let Some(ClusterOutcome {
            cluster_id,
            outcome,
        }) = outcomes.recv().await
        {
            let Some(moves) = by_destination.remove(&cluster_id) else {
                continue;
            };

            if !outcome.is_success() {
                debug!(
                    cluster_id = %cluster_id,
                    devices = moves.len(),
                    "Destination did not scale, keeping prior assignments"
                );
                report.held_back.extend(moves);
                continue;
            }

            for m in moves {
                self.commit_one(m, &mut report).await;
            }
        }

        for (cluster_id, moves) in by_destination {
            warn!(
                cluster_id = %cluster_id,
                devices = moves.len(),
                "No scaling outcome for destination, keeping prior assignments"
            );
            report.held_back.extend(moves);
        }

        info!(
            committed = report.committed.len(),
            held_back = report.held_back.len(),
            failures = report.failures.len(),
            "Commit finished"
        );
        report
    }

    async fn commit_one(&self, m: DeviceMove, report: &mut CommitReport) {
        match self.store.update_cluster(&m.device_id, m.from, m.to).await {
            Ok(()) => {
                debug!(device_id = %m.device_id, cluster_id = %m.to, "Assignment committed");
                report.committed.push(m);
            }
            Err(e) => {
                warn!(
                    device_id = %m.device_id,
                    cluster_id = %m.to,
                    error = %e,
                    "Failed to commit assignment"
                );
                report.failures.push(CommitFailure {
                    device_id: m.device_id,
                    cluster_id: m.to,
                    conflict: e.is_conflict(),
                    error: e.to_string(),
                });
            }
        }
    }
}
