use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skysync_core::config::ServiceConfig;
use skysync_core::remote::{RemoteSession, SnapshotRequest};
use skysync_core::snapshot::{SnapshotManager, SnapshotPayload};
use skysync_core::{
    AuthToken, BlockId, DirectoryRemote, IdentityProvider, Project, ProjectStore, RemoteStorage,
    SnapshotUpdate, StaticIdentity, StorageError, WeakProject,
};

/// Remote that panics when opening a session or when sending a block.
struct PanickingRemote {
    inner: DirectoryRemote,
    in_blocks: bool,
    aborted: AtomicUsize,
}

impl RemoteStorage for PanickingRemote {
    fn begin_snapshot(
        &self,
        token: &AuthToken,
        request: &SnapshotRequest,
    ) -> Result<RemoteSession, StorageError> {
        if !self.in_blocks {
            panic!("remote went away");
        }
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
        _token: &AuthToken,
        _session: &RemoteSession,
        _block: BlockId,
        _data: &[u8],
    ) -> Result<(), StorageError> {
        panic!("block upload blew up");
    }

    fn finish_snapshot(&self, token: &AuthToken, session: &RemoteSession) -> Result<(), StorageError> {
        self.inner.finish_snapshot(token, session)
    }

    fn abort_snapshot(&self, token: &AuthToken, session: &RemoteSession) -> Result<(), StorageError> {
        self.aborted.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_snapshot(token, session)
    }
}

fn payload(blocks: i64) -> SnapshotPayload {
    SnapshotPayload {
        title: "demo".to_string(),
        remote_project_id: None,
        blob: Arc::from(&b"project blob"[..]),
        blocks: (1..=blocks)
            .map(|i| (BlockId::new(i), Arc::<[u8]>::from(vec![i as u8; 256])))
            .collect(),
    }
}

fn weak_project(store: &mut ProjectStore) -> WeakProject {
    let id = store.insert(Project::new("demo"));
    store.get(id).unwrap().weak()
}

type Recorded = Arc<Mutex<Vec<SnapshotUpdate>>>;

fn start(
    manager: &mut SnapshotManager,
    project: WeakProject,
    remote: Arc<dyn RemoteStorage>,
    identity: Arc<dyn IdentityProvider>,
    blocks: i64,
) -> Recorded {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = recorded.clone();
    manager.start(
        project,
        ServiceConfig {
            upload_concurrency: 4,
        },
        remote,
        identity,
        payload(blocks),
        Box::new(move |_, update: &SnapshotUpdate| {
            sink.lock().unwrap().push(update.clone());
        }),
    );
    recorded
}

#[test]
fn progress_is_monotonic_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let remote: Arc<dyn RemoteStorage> = Arc::new(DirectoryRemote::new(dir.path()));
    let mut store = ProjectStore::new();
    let project = weak_project(&mut store);

    let mut manager = SnapshotManager::new();
    let recorded = start(
        &mut manager,
        project,
        remote,
        Arc::new(StaticIdentity::new("token")),
        20,
    );
    let finished = manager.wait_all();
    assert_eq!(finished.len(), 1);
    assert!(finished[0].update.successful);

    let updates = recorded.lock().unwrap();
    assert_eq!(updates[0].total_blocks, 20);
    assert_eq!(updates[0].blocks_uploaded, 0);
    assert!(!updates[0].blob_uploaded);

    let mut last = 0;
    for update in updates.iter() {
        assert!(update.blocks_uploaded >= last);
        assert!(update.blocks_uploaded <= update.total_blocks);
        last = update.blocks_uploaded;
    }
    assert_eq!(updates.iter().filter(|u| u.completed).count(), 1);
    let terminal = updates.last().unwrap();
    assert!(terminal.completed && terminal.successful);
    assert_eq!(terminal.blocks_uploaded, 20);
}

#[test]
fn sweep_releases_each_snapshot_once() {
    let dir = tempfile::tempdir().unwrap();
    let remote: Arc<dyn RemoteStorage> = Arc::new(DirectoryRemote::new(dir.path()));
    let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity::new("token"));
    let mut store = ProjectStore::new();

    let mut manager = SnapshotManager::new();
    for _ in 0..3 {
        let project = weak_project(&mut store);
        start(&mut manager, project, remote.clone(), identity.clone(), 5);
    }
    assert_eq!(manager.active_count(), 3);

    let start_time = std::time::Instant::now();
    let mut released = 0;
    while released < 3 {
        assert!(start_time.elapsed() < Duration::from_secs(10), "snapshots never completed");
        released += manager.sweep_completed().len();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(manager.is_empty());
    assert_eq!(manager.released_total(), 3);
    assert!(manager.sweep_completed().is_empty());
    assert_eq!(manager.released_total(), 3);
}

#[test]
fn signed_out_snapshot_fails_without_contacting_remote() {
    let dir = tempfile::tempdir().unwrap();
    let remote: Arc<dyn RemoteStorage> = Arc::new(DirectoryRemote::new(dir.path()));
    let mut store = ProjectStore::new();
    let project = weak_project(&mut store);

    let mut manager = SnapshotManager::new();
    let recorded = start(
        &mut manager,
        project,
        remote,
        Arc::new(StaticIdentity::signed_out()),
        2,
    );
    let finished = manager.wait_all();

    assert!(!finished[0].update.successful);
    assert_eq!(finished[0].update.error_message.as_deref(), Some("not authorized"));
    assert!(finished[0].remote_project_id.is_none());
    assert_eq!(recorded.lock().unwrap().len(), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn snapshot_against_unknown_remote_project_fails() {
    let dir = tempfile::tempdir().unwrap();
    let remote: Arc<dyn RemoteStorage> = Arc::new(DirectoryRemote::new(dir.path()));
    let mut store = ProjectStore::new();
    let project = weak_project(&mut store);

    let mut manager = SnapshotManager::new();
    let mut request = payload(1);
    request.remote_project_id = Some("gone".to_string());
    manager.start(
        project,
        ServiceConfig::default(),
        remote,
        Arc::new(StaticIdentity::new("token")),
        request,
        Box::new(|_, _: &SnapshotUpdate| {}),
    );

    let finished = manager.wait_all();
    let message = finished[0].update.error_message.clone().unwrap();
    assert!(message.contains("unknown remote project gone"), "{}", message);
}

#[test]
fn panicking_driver_is_failed_and_released() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(PanickingRemote {
        inner: DirectoryRemote::new(dir.path()),
        in_blocks: false,
        aborted: AtomicUsize::new(0),
    });
    let mut store = ProjectStore::new();
    let project = weak_project(&mut store);

    let mut manager = SnapshotManager::new();
    let recorded = start(
        &mut manager,
        project,
        remote.clone(),
        Arc::new(StaticIdentity::new("token")),
        2,
    );
    let finished = manager.wait_all();

    assert_eq!(finished.len(), 1);
    assert!(finished[0].update.completed);
    assert!(!finished[0].update.successful);
    assert_eq!(finished[0].update.error_message.as_deref(), Some("upload driver panicked"));
    assert!(manager.is_empty());
    assert_eq!(manager.released_total(), 1);
    assert!(recorded.lock().unwrap().last().unwrap().completed);
    // no session was opened, so there is nothing to abort
    assert_eq!(remote.aborted.load(Ordering::SeqCst), 0);
}

#[test]
fn panic_during_block_upload_aborts_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(PanickingRemote {
        inner: DirectoryRemote::new(dir.path()),
        in_blocks: true,
        aborted: AtomicUsize::new(0),
    });
    let mut store = ProjectStore::new();
    let project = weak_project(&mut store);

    let mut manager = SnapshotManager::new();
    start(
        &mut manager,
        project,
        remote.clone(),
        Arc::new(StaticIdentity::new("token")),
        3,
    );

    let start_time = std::time::Instant::now();
    let mut finished = Vec::new();
    while finished.is_empty() {
        assert!(start_time.elapsed() < Duration::from_secs(10), "snapshot never released");
        finished = manager.sweep_completed();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(!finished[0].update.successful);
    assert_eq!(remote.aborted.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
