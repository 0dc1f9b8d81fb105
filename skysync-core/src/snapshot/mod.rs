//! Upload sessions.
//!
//! A [`Snapshot`] is one attempt to push a project state to remote storage.
//! Its progress lives in a [`SnapshotState`] shared with the upload driver:
//! the driver is the only writer, everyone else reads.

mod driver;
pub mod manager;

pub use manager::{FinishedSnapshot, SnapshotManager};

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use skysync_types::{BlockId, SnapshotId, SnapshotUpdate};

use crate::auth::IdentityProvider;
use crate::config::ServiceConfig;
use crate::project::WeakProject;
use crate::remote::RemoteStorage;

use driver::UploadDriver;

/// Failure message of a snapshot whose driver thread panicked.
pub const DRIVER_PANICKED: &str = "upload driver panicked";

/// Called on the driver thread for every state change.
pub type UpdateCallback = Box<dyn Fn(SnapshotId, &SnapshotUpdate) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    Created,
    Uploading,
    Completed { successful: bool },
}

/// Progress of one upload. Transitions are checked; an illegal transition
/// is refused and reported as `false`.
#[derive(Debug, Clone)]
pub struct SnapshotState {
    phase: SnapshotPhase,
    blocks_uploaded: u64,
    total_blocks: u64,
    blob_uploaded: bool,
    error_message: Option<String>,
    remote_project_id: Option<String>,
}

impl Default for SnapshotState {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotState {
    pub fn new() -> Self {
        Self {
            phase: SnapshotPhase::Created,
            blocks_uploaded: 0,
            total_blocks: 0,
            blob_uploaded: false,
            error_message: None,
            remote_project_id: None,
        }
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.phase
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, SnapshotPhase::Completed { .. })
    }

    pub fn is_successful(&self) -> bool {
        self.phase == SnapshotPhase::Completed { successful: true }
    }

    pub fn remote_project_id(&self) -> Option<&str> {
        self.remote_project_id.as_deref()
    }

    /// Created → Uploading, once the remote said how many blocks it needs.
    pub fn begin_upload(&mut self, remote_project_id: String, total_blocks: u64) -> bool {
        if self.phase != SnapshotPhase::Created {
            return false;
        }
        self.phase = SnapshotPhase::Uploading;
        self.total_blocks = total_blocks;
        self.remote_project_id = Some(remote_project_id);
        true
    }

    pub fn record_blob_uploaded(&mut self) -> bool {
        if self.phase != SnapshotPhase::Uploading || self.blob_uploaded {
            return false;
        }
        self.blob_uploaded = true;
        true
    }

    pub fn record_block_uploaded(&mut self) -> bool {
        if self.phase != SnapshotPhase::Uploading || self.blocks_uploaded >= self.total_blocks {
            return false;
        }
        self.blocks_uploaded += 1;
        true
    }

    /// Uploading → Completed(successful). Refused until everything is sent.
    pub fn complete(&mut self) -> bool {
        if self.phase != SnapshotPhase::Uploading
            || !self.blob_uploaded
            || self.blocks_uploaded < self.total_blocks
        {
            return false;
        }
        self.phase = SnapshotPhase::Completed { successful: true };
        true
    }

    /// Any non-terminal state → Completed(failed).
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.is_completed() {
            return false;
        }
        self.phase = SnapshotPhase::Completed { successful: false };
        self.error_message = Some(message.into());
        true
    }

    pub fn update(&self) -> SnapshotUpdate {
        let (completed, successful) = match self.phase {
            SnapshotPhase::Completed { successful } => (true, successful),
            _ => (false, false),
        };
        SnapshotUpdate {
            blocks_uploaded: self.blocks_uploaded,
            total_blocks: self.total_blocks,
            blob_uploaded: self.blob_uploaded,
            completed,
            successful,
            error_message: self.error_message.clone(),
        }
    }
}

/// Everything the driver uploads, captured on the controlling thread when
/// the snapshot is created. The project itself is never touched afterwards.
#[derive(Debug, Clone)]
pub struct SnapshotPayload {
    pub title: String,
    pub remote_project_id: Option<String>,
    pub blob: Arc<[u8]>,
    pub blocks: Vec<(BlockId, Arc<[u8]>)>,
}

pub struct Snapshot {
    id: SnapshotId,
    project: WeakProject,
    state: Arc<Mutex<SnapshotState>>,
    blob: Arc<[u8]>,
    pending: Option<UploadDriver>,
    join_handle: Option<JoinHandle<()>>,
}

impl Snapshot {
    pub fn create(
        id: SnapshotId,
        project: WeakProject,
        config: ServiceConfig,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<dyn IdentityProvider>,
        payload: SnapshotPayload,
        on_update: UpdateCallback,
    ) -> Self {
        let state = Arc::new(Mutex::new(SnapshotState::new()));
        let blob = payload.blob.clone();
        let driver = UploadDriver::new(
            id,
            state.clone(),
            config,
            remote,
            identity,
            payload,
            on_update,
        );
        Self {
            id,
            project,
            state,
            blob,
            pending: Some(driver),
            join_handle: None,
        }
    }

    /// Spawn the upload driver. Only the first call has an effect.
    pub fn start(&mut self) {
        if let Some(driver) = self.pending.take() {
            self.join_handle = Some(thread::spawn(move || driver.run()));
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn project(&self) -> WeakProject {
        self.project
    }

    /// The project blob this snapshot uploads.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    fn read<T>(&self, f: impl FnOnce(&SnapshotState) -> T) -> T {
        match self.state.lock() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.read(|s| s.phase())
    }

    pub fn update(&self) -> SnapshotUpdate {
        self.read(|s| s.update())
    }

    pub fn is_completed(&self) -> bool {
        self.read(|s| s.is_completed())
    }

    pub fn is_successful(&self) -> bool {
        self.read(|s| s.is_successful())
    }

    pub fn remote_project_id(&self) -> Option<String> {
        self.read(|s| s.remote_project_id().map(str::to_string))
    }

    /// True once the driver thread has exited but has not been joined.
    pub fn driver_exited(&self) -> bool {
        self.join_handle.as_ref().is_some_and(|h| h.is_finished())
    }

    /// Block until the driver thread exits. A driver that died without
    /// reaching a terminal state is failed here so the snapshot can be swept.
    pub fn wait(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                log::error!(target: "snapshot", "upload driver for {} panicked", self.id);
                let mut state = match self.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                state.fail(DRIVER_PANICKED);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploading(total: u64) -> SnapshotState {
        let mut state = SnapshotState::new();
        assert!(state.begin_upload("remote".to_string(), total));
        state
    }

    #[test]
    fn happy_path_reaches_success() {
        let mut state = uploading(2);
        assert!(state.record_blob_uploaded());
        assert!(state.record_block_uploaded());
        assert!(state.record_block_uploaded());
        assert!(state.complete());

        let update = state.update();
        assert!(update.completed);
        assert!(update.successful);
        assert_eq!(update.blocks_uploaded, 2);
        assert_eq!(update.total_blocks, 2);
        assert!(update.error_message.is_none());
    }

    #[test]
    fn block_counter_never_exceeds_total() {
        let mut state = uploading(1);
        assert!(state.record_block_uploaded());
        assert!(!state.record_block_uploaded());
        assert_eq!(state.update().blocks_uploaded, 1);
    }

    #[test]
    fn blob_is_reported_once() {
        let mut state = uploading(0);
        assert!(state.record_blob_uploaded());
        assert!(!state.record_blob_uploaded());
    }

    #[test]
    fn cannot_complete_with_missing_pieces() {
        let mut state = uploading(1);
        assert!(!state.complete());
        state.record_blob_uploaded();
        assert!(!state.complete());
        state.record_block_uploaded();
        assert!(state.complete());
    }

    #[test]
    fn terminal_state_is_final() {
        let mut state = uploading(3);
        assert!(state.fail("network down"));
        assert!(!state.fail("again"));
        assert!(!state.complete());
        assert!(!state.record_block_uploaded());
        assert!(!state.record_blob_uploaded());

        let update = state.update();
        assert!(update.completed);
        assert!(!update.successful);
        assert_eq!(update.error_message.as_deref(), Some("network down"));
    }

    #[test]
    fn created_state_rejects_progress() {
        let mut state = SnapshotState::new();
        assert!(!state.record_block_uploaded());
        assert!(!state.record_blob_uploaded());
        assert!(!state.complete());
        assert!(state.fail("auth"));
        assert!(!state.begin_upload("remote".to_string(), 1));
    }
}
