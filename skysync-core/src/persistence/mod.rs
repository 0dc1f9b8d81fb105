pub mod schema;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection as SqlConnection, OptionalExtension, Result as SqlResult};

use skysync_types::BlockId;

use crate::project::{Project, ProjectDocument};

/// Local save collaborator used by the sync service.
pub trait ProjectFileIo {
    /// Write `project` to `path`. On success the project records the blob
    /// it wrote so the host can announce it to lifecycle extensions.
    fn save_project(&self, project: &mut Project, path: &Path) -> bool;

    /// Saved-state bookkeeping for a project whose data did not change on disk.
    fn mark_saved(&self, project: &mut Project);
}

/// Project files stored as SQLite databases.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteProjectFile;

impl ProjectFileIo for SqliteProjectFile {
    fn save_project(&self, project: &mut Project, path: &Path) -> bool {
        match save_project(path, project) {
            Ok(blob) => {
                log::info!(target: "persistence", "saved '{}' to {}", project.title(), path.display());
                project.record_saved(path.to_path_buf(), blob);
                true
            }
            Err(e) => {
                log::error!(target: "persistence", "save to {} failed: {}", path.display(), e);
                false
            }
        }
    }

    fn mark_saved(&self, project: &mut Project) {
        project.mark_saved();
    }
}

/// Save a project and return the serialized document blob that was written.
///
/// Uses WAL mode and an explicit transaction so the write is atomic:
/// if the process crashes mid-save the previous data remains intact.
pub fn save_project(path: &Path, project: &Project) -> SqlResult<Vec<u8>> {
    let blob = project
        .serialize_document()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?;

    let conn = SqlConnection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    let tx = conn.unchecked_transaction()?;
    schema::create_tables(&tx)?;
    schema::delete_all_data(&tx)?;

    tx.execute("INSERT INTO project (id, document) VALUES (1, ?1)", params![blob])?;
    {
        let mut stmt = tx.prepare("INSERT INTO blocks (id, data) VALUES (?1, ?2)")?;
        for (id, data) in &project.blocks {
            stmt.execute(params![id.get(), &data[..]])?;
        }
    }
    tx.execute(
        "INSERT INTO cloud (id, remote_id) VALUES (1, ?1)",
        params![project.cloud.remote_id()],
    )?;
    tx.commit()?;

    Ok(blob)
}

/// Load a project. The cloud remote id is restored raw; it takes effect
/// when the cloud state's `on_load` runs.
pub fn load_project(path: &Path) -> SqlResult<Project> {
    let conn = SqlConnection::open(path)?;

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    if let Some(version) = version {
        if version > schema::SCHEMA_VERSION {
            return Err(rusqlite::Error::InvalidParameterName(format!(
                "Project format version {} is newer than supported ({})",
                version,
                schema::SCHEMA_VERSION
            )));
        }
    }

    let document_bytes: Vec<u8> =
        conn.query_row("SELECT document FROM project WHERE id = 1", [], |row| row.get(0))?;
    let document: ProjectDocument = rmp_serde::from_slice(&document_bytes)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?;

    let mut blocks = BTreeMap::new();
    {
        let mut stmt = conn.prepare("SELECT id, data FROM blocks ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        for row in rows {
            let (id, data) = row?;
            blocks.insert(BlockId::new(id), Arc::<[u8]>::from(data));
        }
    }

    let remote_id: Option<String> = conn
        .query_row("SELECT remote_id FROM cloud WHERE id = 1", [], |row| row.get(0))
        .optional()?
        .flatten();

    let mut project = Project::from_parts(path.to_path_buf(), document, blocks);
    project.cloud.restore(remote_id);
    Ok(project)
}
