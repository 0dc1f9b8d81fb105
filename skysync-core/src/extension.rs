//! Lifecycle extensions and their registry.
//!
//! Extensions observe project open/load/save/close events without the editor
//! knowing about them. The registry keeps only weak references: whoever
//! registers an extension keeps it alive.

use std::path::Path;
use std::rc::{Rc, Weak};

use skysync_types::BlockId;

use crate::project::Project;

/// Observer of project lifecycle events. Runs synchronously on the
/// controlling thread; anything slow must be handed to a worker.
pub trait LifecycleExtension {
    fn on_open(&self, project: &mut Project, path: &Path);
    fn on_load(&self, project: &mut Project);
    /// `true` = the extension handled the save.
    fn on_save(&self, project: &mut Project, from_temporary_project: bool) -> bool;
    /// `false` = veto the close.
    fn on_close(&self, project: &mut Project) -> bool;
    fn on_update_saved(&self, project: &mut Project, serialized_blob: &[u8]);
    fn is_block_locked(&self, project: &Project, block: BlockId) -> bool;
}

/// Returned by [`ExtensionRegistry::register`]; identifies the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionHandle(usize);

impl ExtensionHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Weak<dyn LifecycleExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension: &Rc<dyn LifecycleExtension>) -> ExtensionHandle {
        self.extensions.push(Rc::downgrade(extension));
        let handle = ExtensionHandle(self.extensions.len() - 1);
        log::debug!(target: "registry", "registered lifecycle extension {}", handle.0);
        handle
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Live extensions in registration order.
    fn live(&self) -> impl Iterator<Item = Rc<dyn LifecycleExtension>> + '_ {
        self.extensions.iter().filter_map(Weak::upgrade)
    }

    pub fn dispatch_open(&self, project: &mut Project, path: &Path) {
        for ext in self.live() {
            ext.on_open(project, path);
        }
    }

    pub fn dispatch_load(&self, project: &mut Project) {
        for ext in self.live() {
            ext.on_load(project);
        }
    }

    /// Every extension runs; the result is the AND of all answers.
    pub fn dispatch_save(&self, project: &mut Project, from_temporary_project: bool) -> bool {
        self.live().fold(true, |all, ext| {
            ext.on_save(project, from_temporary_project) && all
        })
    }

    /// Every extension runs; a single `false` vetoes the close.
    pub fn dispatch_close(&self, project: &mut Project) -> bool {
        self.live().fold(true, |all, ext| ext.on_close(project) && all)
    }

    pub fn dispatch_update_saved(&self, project: &mut Project, serialized_blob: &[u8]) {
        for ext in self.live() {
            ext.on_update_saved(project, serialized_blob);
        }
    }

    /// A block is locked if any extension locks it.
    pub fn query_block_locked(&self, project: &Project, block: BlockId) -> bool {
        self.live().any(|ext| ext.is_block_locked(project, block))
    }
}
