use std::sync::Arc;

use skysync_types::{SnapshotId, SnapshotUpdate};

use super::{Snapshot, SnapshotPayload, UpdateCallback};
use crate::auth::IdentityProvider;
use crate::config::ServiceConfig;
use crate::project::WeakProject;
use crate::remote::RemoteStorage;

/// Outcome of a snapshot removed from the active set.
#[derive(Debug, Clone)]
pub struct FinishedSnapshot {
    pub id: SnapshotId,
    pub project: WeakProject,
    pub update: SnapshotUpdate,
    pub remote_project_id: Option<String>,
    pub blob: Arc<[u8]>,
}

/// The set of in-flight snapshots. Lives on the controlling thread.
#[derive(Default)]
pub struct SnapshotManager {
    active: Vec<Snapshot>,
    next_id: u64,
    released: u64,
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a snapshot for `project`, retain it and start its driver.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        project: WeakProject,
        config: ServiceConfig,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<dyn IdentityProvider>,
        payload: SnapshotPayload,
        on_update: UpdateCallback,
    ) -> SnapshotId {
        self.next_id = self.next_id.wrapping_add(1);
        let id = SnapshotId::new(self.next_id);

        let mut snapshot = Snapshot::create(id, project, config, remote, identity, payload, on_update);
        snapshot.start();
        self.active.push(snapshot);
        id
    }

    pub fn get(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.active.iter().find(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.active.iter()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Snapshots still held for `project` (completed ones included until swept).
    pub fn active_for(&self, project: WeakProject) -> usize {
        self.active.iter().filter(|s| s.project() == project).count()
    }

    /// Total snapshots removed over the manager's lifetime.
    pub fn released_total(&self) -> u64 {
        self.released
    }

    /// Remove every completed snapshot. Safe to call any number of times:
    /// a removed snapshot is gone from the set and cannot be removed again.
    pub fn sweep_completed(&mut self) -> Vec<FinishedSnapshot> {
        for snapshot in self.active.iter_mut().filter(|s| s.driver_exited()) {
            snapshot.wait();
        }
        let (done, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|s| s.is_completed());
        self.active = keep;

        self.released += done.len() as u64;
        done.into_iter()
            .map(|mut snapshot| {
                snapshot.wait();
                log::debug!(
                    target: "snapshot",
                    "{} released (successful={})",
                    snapshot.id(),
                    snapshot.is_successful()
                );
                FinishedSnapshot {
                    id: snapshot.id(),
                    project: snapshot.project(),
                    update: snapshot.update(),
                    remote_project_id: snapshot.remote_project_id(),
                    blob: snapshot.blob.clone(),
                }
            })
            .collect()
    }

    /// Wait for every driver to finish, then release them all.
    pub fn wait_all(&mut self) -> Vec<FinishedSnapshot> {
        for snapshot in &mut self.active {
            snapshot.wait();
        }
        self.sweep_completed()
    }
}
