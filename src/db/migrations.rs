//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`].

use rusqlite::Connection;

/// The schema version that the current build expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Get the stored embedding dimensionality, if any partition has recorded one.
pub fn get_embedding_dimensions(conn: &Connection) -> rusqlite::Result<Option<usize>> {
    match conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_dimensions'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(val.parse::<usize>().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Record the embedding dimensionality this database was built with.
///
/// A change in dimensionality requires re-embedding every record; callers
/// compare this against their embedder's output before indexing.
pub fn set_embedding_dimensions(conn: &Connection, dimensions: usize) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_dimensions', ?1)",
        [dimensions.to_string()],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(
        schema_version = version,
        target = CURRENT_SCHEMA_VERSION,
        "checking migrations"
    );

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        match next {
            2 => migrate_v1_to_v2(conn)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }

        update_schema_version(conn, next)?;
        version = next;
    }

    Ok(())
}

/// Migration v1 → v2: backfill the embedding dimensionality from existing
/// records. Empty databases record it on first open instead.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) \
         SELECT 'embedding_dimensions', CAST(dimensions AS TEXT) \
         FROM vector_embeddings LIMIT 1",
        [],
    )?;
    Ok(())
}
