//! Per-project cloud bookkeeping.

use std::collections::BTreeMap;
use std::sync::Arc;

use skysync_types::BlockId;

/// A saved blob together with the blocks that existed when it was written.
#[derive(Debug, Clone)]
pub struct SavedUpload {
    pub blob: Arc<[u8]>,
    pub blocks: Vec<(BlockId, Arc<[u8]>)>,
}

/// What the sync service knows about one project's relation to the cloud.
#[derive(Debug, Clone, Default)]
pub struct CloudState {
    remote_id: Option<String>,
    stored_remote_id: Option<String>,
    pending_cloud_save: bool,
    last_uploaded: Option<blake3::Hash>,
    saved: Option<SavedUpload>,
}

impl CloudState {
    /// Whether the canonical copy already lives in remote storage.
    pub fn is_cloud_backed(&self) -> bool {
        self.remote_id.is_some()
    }

    pub fn is_pending_cloud_save(&self) -> bool {
        self.pending_cloud_save
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn mark_pending_cloud_save(&mut self) {
        self.pending_cloud_save = true;
    }

    /// Raw value read back from a project file; takes effect in `on_load`.
    pub fn restore(&mut self, remote_id: Option<String>) {
        self.stored_remote_id = remote_id;
    }

    /// A project loaded with a stored remote id is cloud-backed.
    pub fn on_load(&mut self) {
        self.remote_id = self.stored_remote_id.take().filter(|id| !id.is_empty());
        self.pending_cloud_save = false;
        self.last_uploaded = None;
        self.saved = None;
    }

    /// Returns true when the freshly saved blob should be uploaded. The
    /// blocks are captured now so later edits cannot change what is sent.
    pub fn on_update_saved(&mut self, blob: &[u8], blocks: &BTreeMap<BlockId, Arc<[u8]>>) -> bool {
        if !self.is_cloud_backed() && !self.pending_cloud_save {
            return false;
        }

        let digest = blake3::hash(blob);
        if self.last_uploaded == Some(digest) {
            log::debug!(target: "cloud", "blob unchanged since last upload, skipping");
            return false;
        }

        self.saved = Some(SavedUpload {
            blob: Arc::from(blob),
            blocks: blocks.iter().map(|(id, data)| (*id, Arc::clone(data))).collect(),
        });
        true
    }

    /// What the last accepted `on_update_saved` captured.
    pub fn saved_upload(&self) -> Option<&SavedUpload> {
        self.saved.as_ref()
    }

    pub fn on_snapshot_succeeded(&mut self, remote_id: String, blob: &[u8]) {
        self.remote_id = Some(remote_id);
        self.pending_cloud_save = false;
        self.last_uploaded = Some(blake3::hash(blob));
    }
}
