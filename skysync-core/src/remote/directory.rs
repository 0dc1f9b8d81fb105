use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use skysync_types::{AuthToken, BlockId};

use super::{RemoteSession, RemoteStorage, SnapshotRequest, StorageError};

const MANIFEST: &str = "manifest.json";
const PENDING_MARKER: &str = "pending";
const BLOB_FILE: &str = "project.blob";

/// Per-project manifest kept by the remote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub title: String,
    /// Sealed snapshots, oldest first
    pub snapshots: Vec<String>,
}

/// Remote storage mirrored into a local directory.
///
/// Layout:
/// `<root>/<project>/manifest.json`,
/// `<root>/<project>/blocks/<block>.bin` (shared by all snapshots),
/// `<root>/<project>/snapshots/<snapshot>/project.blob`.
///
/// Every file is staged under a unique name and renamed into place, so
/// overlapping snapshots may write the same block. Manifest updates are
/// serialized by `manifest_lock`.
pub struct DirectoryRemote {
    root: PathBuf,
    counter: AtomicU64,
    manifest_lock: Mutex<()>,
}

impl DirectoryRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self, project_id: &str) -> Result<ProjectManifest, StorageError> {
        let path = self.project_dir(project_id).join(MANIFEST);
        if !path.exists() {
            return Err(StorageError::UnknownProject(project_id.to_string()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn has_block(&self, project_id: &str, block: BlockId) -> bool {
        self.block_path(project_id, block).exists()
    }

    pub fn snapshot_blob(&self, project_id: &str, snapshot_id: &str) -> Result<Vec<u8>, StorageError> {
        Ok(fs::read(self.snapshot_dir(project_id, snapshot_id).join(BLOB_FILE))?)
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    fn snapshot_dir(&self, project_id: &str, snapshot_id: &str) -> PathBuf {
        self.project_dir(project_id).join("snapshots").join(snapshot_id)
    }

    fn block_path(&self, project_id: &str, block: BlockId) -> PathBuf {
        self.project_dir(project_id)
            .join("blocks")
            .join(format!("{}.bin", block.get()))
    }

    fn next_id(&self, prefix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:x}-{:x}", prefix, nanos, n)
    }

    fn lock_manifests(&self) -> MutexGuard<'_, ()> {
        match self.manifest_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_manifest(&self, project_id: &str, manifest: &ProjectManifest) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(manifest)?;
        write_atomic(&self.project_dir(project_id).join(MANIFEST), json.as_bytes())
    }

    fn open_snapshot(&self, session: &RemoteSession) -> Result<PathBuf, StorageError> {
        let dir = self.snapshot_dir(&session.project_id, &session.snapshot_id);
        if !dir.join(PENDING_MARKER).exists() {
            return Err(StorageError::UnknownSnapshot(session.snapshot_id.clone()));
        }
        Ok(dir)
    }
}

fn check_token(token: &AuthToken) -> Result<(), StorageError> {
    if token.is_empty() {
        Err(StorageError::Unauthorized)
    } else {
        Ok(())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

impl RemoteStorage for DirectoryRemote {
    fn begin_snapshot(
        &self,
        token: &AuthToken,
        request: &SnapshotRequest,
    ) -> Result<RemoteSession, StorageError> {
        check_token(token)?;

        let _manifests = self.lock_manifests();
        let project_id = match &request.remote_project_id {
            Some(id) => {
                let mut manifest = self.manifest(id)?;
                manifest.title = request.title.clone();
                self.write_manifest(id, &manifest)?;
                id.clone()
            }
            None => {
                let id = self.next_id("prj");
                fs::create_dir_all(self.project_dir(&id).join("blocks"))?;
                self.write_manifest(
                    &id,
                    &ProjectManifest {
                        title: request.title.clone(),
                        snapshots: Vec::new(),
                    },
                )?;
                id
            }
        };

        let snapshot_id = self.next_id("snap");
        let dir = self.snapshot_dir(&project_id, &snapshot_id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(PENDING_MARKER), b"")?;

        let missing_blocks = request
            .blocks
            .iter()
            .copied()
            .filter(|b| !self.has_block(&project_id, *b))
            .collect();

        Ok(RemoteSession {
            project_id,
            snapshot_id,
            missing_blocks,
        })
    }

    fn upload_blob(
        &self,
        token: &AuthToken,
        session: &RemoteSession,
        blob: &[u8],
    ) -> Result<(), StorageError> {
        check_token(token)?;
        let dir = self.open_snapshot(session)?;
        write_atomic(&dir.join(BLOB_FILE), blob)
    }

    fn upload_block(
        &self,
        token: &AuthToken,
        session: &RemoteSession,
        block: BlockId,
        data: &[u8],
    ) -> Result<(), StorageError> {
        check_token(token)?;
        self.open_snapshot(session)?;
        write_atomic(&self.block_path(&session.project_id, block), data)
    }

    fn finish_snapshot(&self, token: &AuthToken, session: &RemoteSession) -> Result<(), StorageError> {
        check_token(token)?;
        let dir = self.open_snapshot(session)?;
        if !dir.join(BLOB_FILE).exists() {
            return Err(StorageError::Rejected("snapshot has no project blob".to_string()));
        }
        for block in &session.missing_blocks {
            if !self.has_block(&session.project_id, *block) {
                return Err(StorageError::Rejected(format!("block {} was not uploaded", block)));
            }
        }

        let _manifests = self.lock_manifests();
        let mut manifest = self.manifest(&session.project_id)?;
        manifest.snapshots.push(session.snapshot_id.clone());
        self.write_manifest(&session.project_id, &manifest)?;
        fs::remove_file(dir.join(PENDING_MARKER))?;
        Ok(())
    }

    fn abort_snapshot(&self, _token: &AuthToken, session: &RemoteSession) -> Result<(), StorageError> {
        let _manifests = self.lock_manifests();
        let dir = self.open_snapshot(session)?;
        fs::remove_dir_all(&dir)?;

        // a project that never got a sealed snapshot was created for this session
        let manifest = self.manifest(&session.project_id)?;
        let snapshots_dir = self.project_dir(&session.project_id).join("snapshots");
        if manifest.snapshots.is_empty() && is_empty_dir(&snapshots_dir)? {
            fs::remove_dir_all(self.project_dir(&session.project_id))?;
            log::debug!(target: "remote", "dropped unsealed remote project {}", session.project_id);
        }
        Ok(())
    }
}
