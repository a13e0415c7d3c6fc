//! SQL DDL for all engram tables.
//!
//! Defines the `vector_embeddings`, `vector_clusters`, and `schema_meta`
//! tables. All DDL uses `IF NOT EXISTS` and runs inside a transaction, so
//! initialization is idempotent and safe to race: one caller performs the
//! effective setup, the rest observe the completed schema.

use rusqlite::Connection;

/// All schema DDL statements for engram's core tables.
const SCHEMA_SQL: &str = r#"
-- Embedding records: the system of record
CREATE TABLE IF NOT EXISTS vector_embeddings (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    entity_type TEXT NOT NULL CHECK(entity_type IN (
        'task','project','habit','journal_entry','appointment',
        'plan','anchor','note','insight','summary'
    )),
    entity_id TEXT NOT NULL,
    vector BLOB NOT NULL,
    dimensions INTEGER NOT NULL CHECK(dimensions > 0),
    cluster_id INTEGER,
    created_at TEXT NOT NULL,
    UNIQUE(entity_type, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_embeddings_owner ON vector_embeddings(owner_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_cluster ON vector_embeddings(owner_id, cluster_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_entity_id ON vector_embeddings(entity_id);

-- Cluster centroids: advisory search-acceleration index, rebuildable
CREATE TABLE IF NOT EXISTS vector_clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    centroid BLOB NOT NULL,
    dimensions INTEGER NOT NULL CHECK(dimensions > 0),
    member_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_clusters_owner ON vector_clusters(owner_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("BEGIN; {SCHEMA_SQL} COMMIT;"))?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"vector_embeddings".to_string()));
        assert!(tables.contains(&"vector_clusters".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let version: String = conn
            .query_row(
                "SELECT value FROM schema_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, "1");
    }

    #[test]
    fn embeddings_unique_on_entity() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO vector_embeddings (id, owner_id, entity_type, entity_id, vector, dimensions, created_at) \
             VALUES ('a', 'u1', 'task', 't1', x'00000000', 1, '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO vector_embeddings (id, owner_id, entity_type, entity_id, vector, dimensions, created_at) \
             VALUES ('b', 'u1', 'task', 't1', x'00000000', 1, '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn embeddings_reject_unknown_entity_type() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO vector_embeddings (id, owner_id, entity_type, entity_id, vector, dimensions, created_at) \
             VALUES ('a', 'u1', 'calendar', 'c1', x'00000000', 1, '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
