#![allow(dead_code)]
//! Test harness utilities for skysync-core integration tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use skysync_core::remote::{RemoteSession, SnapshotRequest};
use skysync_core::{
    AuthToken, BlockId, CloudSyncService, DirectoryRemote, PlacementHint, Project, ProjectId,
    RemoteStorage, SaveDecision, ServiceConfig, SqliteProjectFile, StaticIdentity, StorageError,
    SyncUi, Workspace,
};

/// UI that answers from fixed decisions and counts how often it was asked.
pub struct FakeUi {
    pub first_save: RefCell<SaveDecision>,
    pub handle_save: RefCell<SaveDecision>,
    /// Answer to the "not signed in" prompt
    pub authorize: Cell<bool>,
    /// Signed in on a positive answer to the prompt
    pub identity: Option<Arc<StaticIdentity>>,
    pub first_save_calls: Cell<usize>,
    pub handle_save_calls: Cell<usize>,
    pub unauthorized_calls: Cell<usize>,
    pub last_placement: Cell<Option<PlacementHint>>,
}

impl FakeUi {
    pub fn new() -> Self {
        Self {
            first_save: RefCell::new(SaveDecision::local()),
            handle_save: RefCell::new(SaveDecision::local()),
            authorize: Cell::new(false),
            identity: None,
            first_save_calls: Cell::new(0),
            handle_save_calls: Cell::new(0),
            unauthorized_calls: Cell::new(0),
            last_placement: Cell::new(None),
        }
    }

    pub fn choosing_cloud(title: &str) -> Self {
        let ui = Self::new();
        *ui.first_save.borrow_mut() = SaveDecision::cloud(title);
        *ui.handle_save.borrow_mut() = SaveDecision::cloud(title);
        ui
    }
}

impl SyncUi for FakeUi {
    fn on_handle_save(&self, _project: &Project, placement: PlacementHint) -> SaveDecision {
        self.handle_save_calls.set(self.handle_save_calls.get() + 1);
        self.last_placement.set(Some(placement));
        self.handle_save.borrow().clone()
    }

    fn on_handle_first_save(&self, _project: &Project, placement: PlacementHint) -> SaveDecision {
        self.first_save_calls.set(self.first_save_calls.get() + 1);
        self.last_placement.set(Some(placement));
        self.first_save.borrow().clone()
    }

    fn on_unauthorized_save(&self, placement: PlacementHint) -> bool {
        self.unauthorized_calls.set(self.unauthorized_calls.get() + 1);
        self.last_placement.set(Some(placement));
        let authorize = self.authorize.get();
        if authorize {
            if let Some(identity) = &self.identity {
                identity.set_token("signed-in");
            }
        }
        authorize
    }
}

/// Directory remote that can be told to fail block uploads or to stall.
pub struct ScriptedRemote {
    pub inner: DirectoryRemote,
    pub fail_blocks: AtomicBool,
    pub block_delay: Duration,
    pub snapshots_begun: AtomicUsize,
    pub blocks_uploaded: AtomicUsize,
    pub snapshots_aborted: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new(root: &std::path::Path) -> Self {
        Self {
            inner: DirectoryRemote::new(root),
            fail_blocks: AtomicBool::new(false),
            block_delay: Duration::ZERO,
            snapshots_begun: AtomicUsize::new(0),
            blocks_uploaded: AtomicUsize::new(0),
            snapshots_aborted: AtomicUsize::new(0),
        }
    }

    pub fn with_block_delay(mut self, delay: Duration) -> Self {
        self.block_delay = delay;
        self
    }
}

impl RemoteStorage for ScriptedRemote {
    fn begin_snapshot(
        &self,
        token: &AuthToken,
        request: &SnapshotRequest,
    ) -> Result<RemoteSession, StorageError> {
        self.snapshots_begun.fetch_add(1, Ordering::SeqCst);
        self.inner.begin_snapshot(token, request)
    }

    fn upload_blob(
        &self,
        token: &AuthToken,
        session: &RemoteSession,
        blob: &[u8],
    ) -> Result<(), StorageError> {
        self.inner.upload_blob(token, session, blob)
    }

    fn upload_block(
        &self,
        token: &AuthToken,
        session: &RemoteSession,
        block: BlockId,
        data: &[u8],
    ) -> Result<(), StorageError> {
        if !self.block_delay.is_zero() {
            std::thread::sleep(self.block_delay);
        }
        if self.fail_blocks.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("connection reset".to_string()));
        }
        self.inner.upload_block(token, session, block, data)?;
        self.blocks_uploaded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish_snapshot(&self, token: &AuthToken, session: &RemoteSession) -> Result<(), StorageError> {
        self.inner.finish_snapshot(token, session)
    }

    fn abort_snapshot(&self, token: &AuthToken, session: &RemoteSession) -> Result<(), StorageError> {
        self.snapshots_aborted.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_snapshot(token, session)
    }
}

/// Every `pending` marker left under `root`.
pub fn pending_markers(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.file_name().is_some_and(|n| n == "pending") {
                found.push(path);
            }
        }
    }
    found
}

/// A workspace wired to a scratch cache dir, a scripted remote and a fake UI.
pub struct TestEnv {
    pub dir: TempDir,
    pub workspace: Workspace,
    pub ui: Rc<FakeUi>,
    pub identity: Arc<StaticIdentity>,
    pub remote: Arc<ScriptedRemote>,
}

impl TestEnv {
    pub fn new(ui: FakeUi, identity: StaticIdentity) -> Self {
        Self::build(ui, identity, |remote| remote)
    }

    pub fn build(
        mut ui: FakeUi,
        identity: StaticIdentity,
        configure: impl FnOnce(ScriptedRemote) -> ScriptedRemote,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = Arc::new(identity);
        ui.identity = Some(identity.clone());
        let ui = Rc::new(ui);
        let remote = Arc::new(configure(ScriptedRemote::new(&dir.path().join("remote"))));

        let file_io = Rc::new(SqliteProjectFile);
        let service = CloudSyncService::new(
            dir.path().join("cache"),
            ServiceConfig {
                upload_concurrency: 3,
            },
            file_io.clone(),
            remote.clone(),
            identity.clone(),
        )
        .with_ui(ui.clone());

        Self {
            dir,
            workspace: Workspace::new(service, file_io),
            ui,
            identity,
            remote,
        }
    }

    /// A temporary project with `blocks` blocks, all on one track.
    pub fn project_with_blocks(&mut self, title: &str, blocks: usize) -> ProjectId {
        let id = self.workspace.new_project(title);
        let project = self.workspace.project_mut(id).expect("project");
        let ids: Vec<BlockId> = (0..blocks)
            .map(|i| project.add_block(vec![i as u8; 64]))
            .collect();
        project.add_track("main", ids);
        id
    }

    /// Pump until nothing is queued or in flight.
    pub fn settle(&mut self) {
        drive_until(&mut self.workspace, |ws| !ws.is_busy(), Duration::from_secs(10));
    }
}

/// Pump the workspace until `done` holds, or panic after `timeout`.
pub fn drive_until(
    workspace: &mut Workspace,
    mut done: impl FnMut(&Workspace) -> bool,
    timeout: Duration,
) {
    let start = Instant::now();
    while Instant::now().duration_since(start) < timeout {
        workspace.pump();
        if done(workspace) {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("Timed out after {:?} waiting for workspace", timeout);
}

/// Give worker threads a chance to post, then pump once more.
pub fn drain_for(workspace: &mut Workspace, period: Duration) {
    let start = Instant::now();
    while Instant::now().duration_since(start) < period {
        workspace.pump();
        std::thread::sleep(Duration::from_millis(5));
    }
}
