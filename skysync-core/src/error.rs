use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the host when opening projects.
///
/// Save paths report success as `bool` and upload failures travel through
/// the snapshot's terminal update, so this type stays small.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("project file not found: {0}")]
    NotFound(PathBuf),
    #[error("project database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
