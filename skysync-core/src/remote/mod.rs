//! Remote storage contract.
//!
//! Only the shape of the conversation with the storage backend is modelled:
//! open a snapshot, send the project blob and the blocks the remote lacks,
//! then seal it, or abort it on failure. [`DirectoryRemote`] is a filesystem-backed implementation.

mod directory;

pub use directory::DirectoryRemote;

use thiserror::Error;

use skysync_types::{AuthToken, BlockId};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not authorized")]
    Unauthorized,
    #[error("unknown remote project {0}")]
    UnknownProject(String),
    #[error("unknown snapshot {0}")]
    UnknownSnapshot(String),
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// What the client is about to upload.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub title: String,
    /// Set when the project is already cloud-backed
    pub remote_project_id: Option<String>,
    pub blob_len: u64,
    pub blocks: Vec<BlockId>,
}

/// An open snapshot on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    pub project_id: String,
    pub snapshot_id: String,
    /// Blocks the remote does not have yet; only these are uploaded
    pub missing_blocks: Vec<BlockId>,
}

/// Storage backend. Called from upload worker threads; calls may block.
pub trait RemoteStorage: Send + Sync {
    fn begin_snapshot(
        &self,
        token: &AuthToken,
        request: &SnapshotRequest,
    ) -> Result<RemoteSession, StorageError>;

    fn upload_blob(
        &self,
        token: &AuthToken,
        session: &RemoteSession,
        blob: &[u8],
    ) -> Result<(), StorageError>;

    fn upload_block(
        &self,
        token: &AuthToken,
        session: &RemoteSession,
        block: BlockId,
        data: &[u8],
    ) -> Result<(), StorageError>;

    fn finish_snapshot(&self, token: &AuthToken, session: &RemoteSession) -> Result<(), StorageError>;

    /// Discard an unsealed snapshot after a failed upload.
    fn abort_snapshot(&self, token: &AuthToken, session: &RemoteSession) -> Result<(), StorageError>;
}
