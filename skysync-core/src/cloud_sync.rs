//! The cloud sync orchestrator.
//!
//! [`CloudSyncService`] is a lifecycle extension: the host dispatches project
//! events to it through the [`ExtensionRegistry`](crate::extension::ExtensionRegistry)
//! and pumps it on the controlling thread. Saves that promote a project to the
//! cloud are written to the local cache directory first; the upload itself is
//! started from `on_update_saved` once the save has produced a blob.

use std::cell::{Cell, Ref, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use skysync_types::{BlockId, PlacementHint, SaveDecision, SnapshotId, SnapshotUpdate};

use crate::auth::{AuthGate, IdentityProvider};
use crate::config::{Config, ServiceConfig};
use crate::extension::LifecycleExtension;
use crate::persistence::ProjectFileIo;
use crate::project::{safe_project_path, Project, ProjectStore, SavedUpload, WeakProject};
use crate::remote::RemoteStorage;
use crate::scheduler::{SyncTask, TaskQueue};
use crate::snapshot::{FinishedSnapshot, SnapshotManager, SnapshotPayload, UpdateCallback};

/// Save dialogs and prompts the service may need. Implemented by the frontend.
pub trait SyncUi {
    /// "Save to cloud?" for an explicit cloud save of a local project.
    fn on_handle_save(&self, project: &Project, placement: PlacementHint) -> SaveDecision;
    /// Local vs. cloud choice for the first save of a brand-new project.
    fn on_handle_first_save(&self, project: &Project, placement: PlacementHint) -> SaveDecision;
    /// The user is not signed in. Returns true if they authorized and want to retry.
    fn on_unauthorized_save(&self, placement: PlacementHint) -> bool;
}

pub struct CloudSyncService {
    config: ServiceConfig,
    cache_dir: PathBuf,
    file_io: Rc<dyn ProjectFileIo>,
    ui: Option<Rc<dyn SyncUi>>,
    remote: Arc<dyn RemoteStorage>,
    auth: AuthGate,
    tasks: TaskQueue,
    snapshots: RefCell<SnapshotManager>,
    finished: RefCell<Vec<FinishedSnapshot>>,
    auth_in_flight: Cell<usize>,
    shutting_down: Cell<bool>,
}

impl CloudSyncService {
    pub fn new(
        cache_dir: PathBuf,
        config: ServiceConfig,
        file_io: Rc<dyn ProjectFileIo>,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let tasks = TaskQueue::new();
        let auth = AuthGate::new(identity, tasks.sender());
        Self {
            config,
            cache_dir,
            file_io,
            ui: None,
            remote,
            auth,
            tasks,
            snapshots: RefCell::new(SnapshotManager::new()),
            finished: RefCell::new(Vec::new()),
            auth_in_flight: Cell::new(0),
            shutting_down: Cell::new(false),
        }
    }

    pub fn from_config(
        config: &Config,
        file_io: Rc<dyn ProjectFileIo>,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self::new(
            config.cloud_projects_save_path(),
            config.service(),
            file_io,
            remote,
            identity,
        )
    }

    pub fn with_ui(mut self, ui: Rc<dyn SyncUi>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Promote a project to the cloud, or just mark it saved if it already is.
    pub fn save_to_cloud(&self, project: &mut Project) {
        if project.is_cloud_backed() {
            self.file_io.mark_saved(project);
            return;
        }

        let Some(ui) = &self.ui else {
            log::warn!(target: "cloud", "cloud save requested without a UI to confirm it");
            return;
        };
        let decision = ui.on_handle_save(project, PlacementHint::for_project(project.id()));
        if !decision.save_to_cloud {
            log::debug!(target: "cloud", "cloud save of '{}' declined", project.title());
            return;
        }

        if !self.do_cloud_save(project, &decision.title) {
            log::warn!(target: "cloud", "cloud save of '{}' failed locally", decision.title);
        }
    }

    /// Write the project into the cloud cache directory as `title`. The upload
    /// starts later, when the host announces the saved blob.
    pub fn do_cloud_save(&self, project: &mut Project, title: &str) -> bool {
        project.cloud.mark_pending_cloud_save();

        if let Err(e) = std::fs::create_dir_all(&self.cache_dir) {
            log::error!(
                target: "cloud",
                "could not create cloud cache {}: {}",
                self.cache_dir.display(),
                e
            );
            return false;
        }

        project.set_title(title);
        let path = safe_project_path(&self.cache_dir, title);
        self.file_io.save_project(project, &path)
    }

    /// Run every continuation posted by worker threads. Returns how many ran.
    pub fn pump(&self, projects: &mut ProjectStore) -> usize {
        let mut handled = 0;
        while let Some(task) = self.tasks.try_next() {
            self.run_task(task, projects);
            handled += 1;
        }

        // a driver that died without publishing its end posts nothing
        let orphaned = self
            .snapshots
            .borrow()
            .iter()
            .any(|s| s.driver_exited() && !s.is_completed());
        if orphaned {
            let done = self.snapshots.borrow_mut().sweep_completed();
            self.settle(done, projects);
        }
        handled
    }

    /// True while a token check is running, tasks are queued or snapshots
    /// are still held.
    pub fn is_busy(&self) -> bool {
        self.auth_in_flight.get() > 0
            || !self.tasks.is_empty()
            || !self.snapshots.borrow().is_empty()
    }

    pub fn snapshots(&self) -> Ref<'_, SnapshotManager> {
        self.snapshots.borrow()
    }

    pub fn active_snapshots(&self) -> usize {
        self.snapshots.borrow().active_count()
    }

    pub fn released_total(&self) -> u64 {
        self.snapshots.borrow().released_total()
    }

    /// Outcomes of released snapshots not yet collected by the frontend.
    pub fn take_finished(&self) -> Vec<FinishedSnapshot> {
        std::mem::take(&mut *self.finished.borrow_mut())
    }

    /// Wait for in-flight uploads and release them. Auth continuations that
    /// arrive afterwards are dropped instead of starting new snapshots.
    pub fn shutdown(&self, projects: &mut ProjectStore) {
        self.shutting_down.set(true);
        let outstanding = self.snapshots.borrow().active_count();
        if outstanding > 0 {
            log::info!(target: "cloud", "waiting for {} snapshot(s) to finish", outstanding);
        }
        let done = self.snapshots.borrow_mut().wait_all();
        self.settle(done, projects);
        self.pump(projects);
    }

    fn run_task(&self, task: SyncTask, projects: &mut ProjectStore) {
        match task {
            SyncTask::AuthResolved { project, token } => {
                self.auth_in_flight.set(self.auth_in_flight.get().saturating_sub(1));
                if self.shutting_down.get() {
                    log::debug!(target: "cloud", "shutting down, dropping auth result");
                    return;
                }
                if token.is_empty() {
                    self.tasks
                        .sender()
                        .call_after(SyncTask::UnauthorizedPrompt { project });
                    return;
                }
                match project.resolve(projects) {
                    Some(p) => self.create_snapshot(p),
                    None => log::debug!(target: "cloud", "{} closed before upload", project.id()),
                }
            }
            SyncTask::UnauthorizedPrompt { project } => {
                if self.shutting_down.get() {
                    return;
                }
                let Some(p) = project.resolve(projects) else {
                    log::debug!(target: "cloud", "{} closed before auth prompt", project.id());
                    return;
                };
                let Some(ui) = &self.ui else {
                    log::warn!(target: "cloud", "not authorized and no UI to ask, upload skipped");
                    return;
                };
                if ui.on_unauthorized_save(PlacementHint::for_project(p.id())) {
                    self.create_snapshot(p);
                } else {
                    log::info!(target: "cloud", "upload of '{}' abandoned, not authorized", p.title());
                }
            }
            SyncTask::SnapshotFinished { snapshot } => {
                log::trace!(target: "cloud", "{} finished, sweeping", snapshot);
                let done = self.snapshots.borrow_mut().sweep_completed();
                self.settle(done, projects);
            }
        }
    }

    /// Bookkeeping for released snapshots whose project is still open.
    fn settle(&self, done: Vec<FinishedSnapshot>, projects: &mut ProjectStore) {
        for finished in &done {
            if !finished.update.successful {
                log::warn!(
                    target: "cloud",
                    "{} failed: {}",
                    finished.id,
                    finished.update.error_message.as_deref().unwrap_or("unknown error")
                );
                continue;
            }
            let Some(project) = finished.project.resolve_mut(projects) else {
                log::debug!(target: "cloud", "{} succeeded for a closed project", finished.id);
                continue;
            };
            if let Some(remote_id) = &finished.remote_project_id {
                log::info!(
                    target: "cloud",
                    "'{}' is now cloud-backed as {}",
                    project.title(),
                    remote_id
                );
                project.cloud.on_snapshot_succeeded(remote_id.clone(), &finished.blob);
                // the file on disk does not carry the remote id yet
                project.dirty = true;
            }
        }
        self.finished.borrow_mut().extend(done);
    }

    fn create_snapshot(&self, project: &Project) {
        let saved = match project.cloud.saved_upload() {
            Some(saved) => saved.clone(),
            None => match project.serialize_document() {
                Ok(bytes) => SavedUpload {
                    blob: bytes.into(),
                    blocks: project
                        .blocks
                        .iter()
                        .map(|(id, data)| (*id, Arc::clone(data)))
                        .collect(),
                },
                Err(e) => {
                    log::error!(target: "cloud", "could not serialize '{}': {}", project.title(), e);
                    return;
                }
            },
        };
        let payload = SnapshotPayload {
            title: project.title().to_string(),
            remote_project_id: project.cloud.remote_id().map(str::to_string),
            blob: saved.blob,
            blocks: saved.blocks,
        };

        let weak = project.weak();
        let mut snapshots = self.snapshots.borrow_mut();
        let overlapping = snapshots.active_for(weak);
        if overlapping > 0 {
            log::warn!(
                target: "cloud",
                "'{}' already has {} snapshot(s) in flight, starting another",
                project.title(),
                overlapping
            );
        }

        let id = snapshots.start(
            weak,
            self.config.clone(),
            self.remote.clone(),
            self.auth.identity(),
            payload,
            self.progress_callback(),
        );
        log::info!(target: "cloud", "{} created for '{}'", id, project.title());
    }

    fn progress_callback(&self) -> UpdateCallback {
        let tasks = self.tasks.sender();
        Box::new(move |snapshot: SnapshotId, update: &SnapshotUpdate| {
            log::debug!(
                target: "cloud",
                "{}: {}/{} blocks, blob uploaded: {}, completed: {}, successful: {}, error: {}",
                snapshot,
                update.blocks_uploaded,
                update.total_blocks,
                update.blob_uploaded,
                update.completed,
                update.successful,
                update.error_message.as_deref().unwrap_or("-")
            );
            if update.completed {
                tasks.call_after(SyncTask::SnapshotFinished { snapshot });
            }
        })
    }

    fn request_upload(&self, project: WeakProject) {
        self.auth_in_flight.set(self.auth_in_flight.get() + 1);
        self.auth.ensure_authenticated(true, move |token| SyncTask::AuthResolved {
            project,
            token,
        });
    }
}

impl LifecycleExtension for CloudSyncService {
    fn on_open(&self, project: &mut Project, path: &Path) {
        log::debug!(target: "cloud", "opened '{}' from {}", project.title(), path.display());
    }

    fn on_load(&self, project: &mut Project) {
        project.cloud.on_load();
    }

    fn on_save(&self, project: &mut Project, from_temporary_project: bool) -> bool {
        if !from_temporary_project {
            return false;
        }
        let Some(ui) = &self.ui else {
            return false;
        };
        let decision = ui.on_handle_first_save(project, PlacementHint::for_project(project.id()));
        if !decision.save_to_cloud {
            return false;
        }
        self.do_cloud_save(project, &decision.title)
    }

    fn on_close(&self, _project: &mut Project) -> bool {
        true
    }

    fn on_update_saved(&self, project: &mut Project, serialized_blob: &[u8]) {
        if !project.cloud.on_update_saved(serialized_blob, &project.blocks) {
            return;
        }
        self.request_upload(project.weak());
    }

    fn is_block_locked(&self, _project: &Project, _block: BlockId) -> bool {
        false
    }
}
