//! # skysync-core
//!
//! Cloud synchronization for projects: promote a local project to the
//! cloud, then upload a snapshot every time it is saved.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use skysync_core::{CloudSyncService, Config, DirectoryRemote, SqliteProjectFile,
//!     StaticIdentity, Workspace};
//!
//! let config = Config::load();
//! let file_io = Rc::new(SqliteProjectFile);
//! let service = CloudSyncService::from_config(
//!     &config,
//!     file_io.clone(),
//!     Arc::new(DirectoryRemote::new(config.remote_root())),
//!     Arc::new(StaticIdentity::new("token")),
//! )
//! .with_ui(Rc::new(my_ui));
//!
//! let mut workspace = Workspace::new(service, file_io);
//! let id = workspace.new_project("demo");
//! workspace.save(id);            // first save: the UI picks local or cloud
//! while workspace.is_busy() {
//!     workspace.pump();          // run continuations from worker threads
//! }
//! workspace.shutdown();
//! ```
//!
//! ## Threads
//!
//! Projects, the extension registry and the active snapshot set belong to
//! the thread that owns the [`Workspace`]. Token validation and uploads run
//! on worker threads and report back through the [`scheduler`] queue, which
//! [`Workspace::pump`] drains.

pub mod auth;
pub mod cloud_sync;
pub mod config;
pub mod error;
pub mod extension;
pub mod persistence;
pub mod project;
pub mod remote;
pub mod scheduler;
pub mod snapshot;
pub mod workspace;

pub use auth::{AuthGate, IdentityProvider, StaticIdentity, TokenFileIdentity};
pub use cloud_sync::{CloudSyncService, SyncUi};
pub use config::{Config, ServiceConfig};
pub use error::SyncError;
pub use extension::{ExtensionHandle, ExtensionRegistry, LifecycleExtension};
pub use persistence::{ProjectFileIo, SqliteProjectFile};
pub use project::{Project, ProjectStore, WeakProject};
pub use remote::{DirectoryRemote, RemoteStorage, StorageError};
pub use snapshot::{FinishedSnapshot, Snapshot, SnapshotManager};
pub use workspace::Workspace;

pub use skysync_types::{AuthToken, BlockId, PlacementHint, ProjectId, SaveDecision, SnapshotId,
    SnapshotUpdate};
