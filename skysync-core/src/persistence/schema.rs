use rusqlite::{params, Connection, Result as SqlResult};

/// Schema version for the project file format.
pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables of a project file.
pub fn create_tables(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

/// Delete all data from all tables (preserving schema).
pub fn delete_all_data(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(DELETE_ALL_SQL)
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    document BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS cloud (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    remote_id TEXT
);
";

const DELETE_ALL_SQL: &str = "
DELETE FROM project;
DELETE FROM blocks;
DELETE FROM cloud;
";
