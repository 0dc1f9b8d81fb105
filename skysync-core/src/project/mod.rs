//! The local document and the arena that owns open projects.
//!
//! Nothing outside the controlling thread holds a `&Project`. Code that must
//! refer to a project across an asynchronous boundary keeps a [`WeakProject`]
//! and resolves it against the [`ProjectStore`] at the point of use.

pub mod cloud_state;
pub mod safe_path;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use skysync_types::{BlockId, ProjectId};

pub use cloud_state::{CloudState, SavedUpload};
pub use safe_path::{safe_project_path, PROJECT_EXTENSION};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Serializable project metadata. Content blocks are stored separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub title: String,
    pub sample_rate: u32,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub blocks: Vec<BlockId>,
}

impl ProjectDocument {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            tracks: Vec::new(),
        }
    }
}

pub struct Project {
    id: ProjectId,
    /// Where the project was last saved (None = never saved)
    pub path: Option<PathBuf>,
    pub document: ProjectDocument,
    pub blocks: BTreeMap<BlockId, Arc<[u8]>>,
    /// Changed since the last save/load
    pub dirty: bool,
    /// Brand-new project that has never been written anywhere
    pub temporary: bool,
    pub cloud: CloudState,
    just_saved: Option<Vec<u8>>,
}

impl Project {
    /// A fresh, unsaved project. Its id is assigned by [`ProjectStore::insert`].
    pub fn new(title: &str) -> Self {
        Self {
            id: ProjectId::new(0),
            path: None,
            document: ProjectDocument::new(title),
            blocks: BTreeMap::new(),
            dirty: false,
            temporary: true,
            cloud: CloudState::default(),
            just_saved: None,
        }
    }

    /// A project restored from disk.
    pub fn from_parts(
        path: PathBuf,
        document: ProjectDocument,
        blocks: BTreeMap<BlockId, Arc<[u8]>>,
    ) -> Self {
        Self {
            id: ProjectId::new(0),
            path: Some(path),
            document,
            blocks,
            dirty: false,
            temporary: false,
            cloud: CloudState::default(),
            just_saved: None,
        }
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn weak(&self) -> WeakProject {
        WeakProject(self.id)
    }

    pub fn title(&self) -> &str {
        &self.document.title
    }

    pub fn set_title(&mut self, title: &str) {
        if self.document.title != title {
            self.document.title = title.to_string();
            self.dirty = true;
        }
    }

    pub fn is_cloud_backed(&self) -> bool {
        self.cloud.is_cloud_backed()
    }

    /// Store a new content block and return its id.
    pub fn add_block(&mut self, data: impl Into<Arc<[u8]>>) -> BlockId {
        let next = self
            .blocks
            .keys()
            .next_back()
            .map(|id| id.get() + 1)
            .unwrap_or(1);
        let id = BlockId::new(next);
        self.blocks.insert(id, data.into());
        self.dirty = true;
        id
    }

    pub fn add_track(&mut self, name: &str, blocks: Vec<BlockId>) {
        self.document.tracks.push(Track {
            name: name.to_string(),
            blocks,
        });
        self.dirty = true;
    }

    /// Blocks referenced by at least one track.
    pub fn referenced_blocks(&self) -> BTreeSet<BlockId> {
        self.document
            .tracks
            .iter()
            .flat_map(|t| t.blocks.iter().copied())
            .collect()
    }

    pub fn serialize_document(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(&self.document)
    }

    /// Bookkeeping after a save that did not rewrite the project.
    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    /// Called by the file layer after a successful write.
    pub fn record_saved(&mut self, path: PathBuf, blob: Vec<u8>) {
        self.path = Some(path);
        self.dirty = false;
        self.temporary = false;
        self.just_saved = Some(blob);
    }

    /// The blob written by the last save, if it has not been announced yet.
    pub fn take_saved_blob(&mut self) -> Option<Vec<u8>> {
        self.just_saved.take()
    }
}

/// Non-owning handle to a project. Resolve it every time it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakProject(ProjectId);

impl WeakProject {
    pub fn id(self) -> ProjectId {
        self.0
    }

    pub fn resolve(self, store: &ProjectStore) -> Option<&Project> {
        store.get(self.0)
    }

    pub fn resolve_mut(self, store: &mut ProjectStore) -> Option<&mut Project> {
        store.get_mut(self.0)
    }
}

/// Arena of open projects, owned by the controlling thread.
#[derive(Default)]
pub struct ProjectStore {
    projects: HashMap<ProjectId, Project>,
    next_id: u64,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut project: Project) -> ProjectId {
        self.next_id = self.next_id.wrapping_add(1);
        let id = ProjectId::new(self.next_id);
        project.id = id;
        self.projects.insert(id, project);
        id
    }

    pub fn get(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(&id)
    }

    pub fn get_mut(&mut self, id: ProjectId) -> Option<&mut Project> {
        self.projects.get_mut(&id)
    }

    pub fn remove(&mut self, id: ProjectId) -> Option<Project> {
        self.projects.remove(&id)
    }

    pub fn contains(&self, id: ProjectId) -> bool {
        self.projects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
