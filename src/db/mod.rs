//! SQLite database lifecycle: open, schema initialization, migrations.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// Open (or create) the engram database at the given path, with the schema
/// initialized and migrations applied.
///
/// Idempotent and safe to invoke concurrently from multiple callers: the DDL
/// is `IF NOT EXISTS` inside a transaction, so exactly one effective setup
/// occurs and every caller that returns observes the completed schema.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // Tolerate a racing initializer holding the write lock
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Snapshot of database health for diagnostics.
#[derive(Debug)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub schema_version: u32,
    pub embedding_count: i64,
    pub cluster_count: i64,
}

/// Run an integrity check and collect table counts.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    let schema_version = migrations::get_schema_version(conn)?;
    let embedding_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM vector_embeddings", [], |row| row.get(0))?;
    let cluster_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM vector_clusters", [], |row| row.get(0))?;

    Ok(HealthReport {
        integrity_ok: integrity == "ok",
        schema_version,
        embedding_count,
        cluster_count,
    })
}

/// Open an in-memory database with the full schema, for tests.
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}
