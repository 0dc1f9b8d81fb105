//! The host side: open projects plus the lifecycle extensions watching them.

use std::io;
use std::path::Path;
use std::rc::Rc;

use skysync_types::{BlockId, ProjectId};

use crate::cloud_sync::CloudSyncService;
use crate::error::SyncError;
use crate::extension::{ExtensionHandle, ExtensionRegistry, LifecycleExtension};
use crate::persistence::{self, ProjectFileIo};
use crate::project::{Project, ProjectStore};

/// Owns every open project and drives the extension registry.
///
/// All methods run on the controlling thread. Saves never call back into
/// extensions while one is running: a save records its blob on the project
/// and the workspace announces it through `dispatch_update_saved` afterwards.
pub struct Workspace {
    projects: ProjectStore,
    registry: ExtensionRegistry,
    cloud: Rc<CloudSyncService>,
    file_io: Rc<dyn ProjectFileIo>,
}

impl Workspace {
    /// The cloud service is registered as the first extension.
    pub fn new(cloud: CloudSyncService, file_io: Rc<dyn ProjectFileIo>) -> Self {
        let cloud = Rc::new(cloud);
        let mut registry = ExtensionRegistry::new();
        let as_extension: Rc<dyn LifecycleExtension> = cloud.clone();
        registry.register(&as_extension);
        Self {
            projects: ProjectStore::new(),
            registry,
            cloud,
            file_io,
        }
    }

    /// Register another extension. The registry does not keep it alive.
    pub fn register_extension(&mut self, extension: &Rc<dyn LifecycleExtension>) -> ExtensionHandle {
        self.registry.register(extension)
    }

    pub fn cloud(&self) -> &CloudSyncService {
        &self.cloud
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn project_mut(&mut self, id: ProjectId) -> Option<&mut Project> {
        self.projects.get_mut(id)
    }

    /// A new temporary project; nothing is written until its first save.
    pub fn new_project(&mut self, title: &str) -> ProjectId {
        let id = self.projects.insert(Project::new(title));
        log::debug!(target: "workspace", "new project {} '{}'", id, title);
        id
    }

    pub fn open(&mut self, path: &Path) -> Result<ProjectId, SyncError> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            )
            .into());
        }
        let project = persistence::load_project(path)?;
        let id = self.projects.insert(project);
        if let Some(project) = self.projects.get_mut(id) {
            self.registry.dispatch_open(project, path);
            self.registry.dispatch_load(project);
            log::info!(target: "workspace", "opened '{}' from {}", project.title(), path.display());
        }
        Ok(id)
    }

    /// Save a project where it lives. Every save is offered to the extensions
    /// first. For a temporary project `false` means nobody handled it and the
    /// caller should ask for a location (`save_as`).
    pub fn save(&mut self, id: ProjectId) -> bool {
        let Some(project) = self.projects.get_mut(id) else {
            return false;
        };

        let saved = if project.temporary {
            let handled = self.registry.dispatch_save(project, true);
            if handled && project.temporary {
                log::warn!(target: "workspace", "first save of '{}' claimed but nothing was written", project.title());
            }
            handled && !project.temporary
        } else if self.registry.dispatch_save(project, false) {
            true
        } else {
            match project.path.clone() {
                Some(path) => self.file_io.save_project(project, &path),
                None => false,
            }
        };

        self.announce_saved(id);
        saved
    }

    /// Save to an explicit location. Extensions see this as a regular save,
    /// never as the first save of a temporary project.
    pub fn save_as(&mut self, id: ProjectId, path: &Path) -> bool {
        let Some(project) = self.projects.get_mut(id) else {
            return false;
        };
        let saved =
            self.registry.dispatch_save(project, false) || self.file_io.save_project(project, path);
        self.announce_saved(id);
        saved
    }

    /// Explicit "save to cloud" command.
    pub fn save_to_cloud(&mut self, id: ProjectId) {
        let Some(project) = self.projects.get_mut(id) else {
            return;
        };
        self.cloud.save_to_cloud(project);
        self.announce_saved(id);
    }

    /// Close unless an extension vetoes. Uploads already running continue.
    pub fn close(&mut self, id: ProjectId) -> bool {
        let Some(project) = self.projects.get_mut(id) else {
            return false;
        };
        if !self.registry.dispatch_close(project) {
            log::info!(target: "workspace", "close of '{}' vetoed", project.title());
            return false;
        }
        self.projects.remove(id);
        true
    }

    pub fn is_block_locked(&self, id: ProjectId, block: BlockId) -> bool {
        self.projects
            .get(id)
            .is_some_and(|p| self.registry.query_block_locked(p, block))
    }

    /// Drop blocks no track references, keeping any an extension locks.
    pub fn compact_blocks(&mut self, id: ProjectId) -> usize {
        let Some(project) = self.projects.get_mut(id) else {
            return 0;
        };
        let referenced = project.referenced_blocks();
        let unused: Vec<BlockId> = project
            .blocks
            .keys()
            .copied()
            .filter(|b| !referenced.contains(b))
            .collect();

        let mut removed = 0;
        for block in unused {
            if self.registry.query_block_locked(project, block) {
                log::debug!(target: "workspace", "block {} is locked, kept", block);
                continue;
            }
            project.blocks.remove(&block);
            removed += 1;
        }
        if removed > 0 {
            project.dirty = true;
        }
        removed
    }

    /// Run pending continuations on this thread.
    pub fn pump(&mut self) -> usize {
        self.cloud.pump(&mut self.projects)
    }

    pub fn is_busy(&self) -> bool {
        self.cloud.is_busy()
    }

    pub fn shutdown(&mut self) {
        self.cloud.shutdown(&mut self.projects);
    }

    fn announce_saved(&mut self, id: ProjectId) {
        let Some(project) = self.projects.get_mut(id) else {
            return;
        };
        if let Some(blob) = project.take_saved_blob() {
            self.registry.dispatch_update_saved(project, &blob);
        }
    }
}
