use engram::db;
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("memory.db");
    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();
    assert!(db_path.exists());

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM vector_embeddings", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn open_is_idempotent_across_reopens() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("memory.db");

    {
        let conn = db::open_database(&db_path).unwrap();
        conn.execute(
            "INSERT INTO vector_embeddings (id, owner_id, entity_type, entity_id, vector, dimensions, created_at) \
             VALUES ('a', 'u1', 'task', 't1', x'0000803f', 1, '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }

    // Reopen: schema setup must not clobber existing data
    let conn = db::open_database(&db_path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM vector_embeddings", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn concurrent_initialization_is_safe() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("memory.db");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = db_path.clone();
            std::thread::spawn(move || {
                let conn = db::open_database(&path).unwrap();
                // Every racer observes the completed schema
                let report = db::check_database_health(&conn).unwrap();
                assert!(report.integrity_ok);
                assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn health_check_passes_on_valid_db() {
    let conn = db::open_memory_database().unwrap();

    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
    assert_eq!(report.embedding_count, 0);
    assert_eq!(report.cluster_count, 0);
}

#[test]
fn wal_mode_enabled_on_disk() {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_database(tmp.path().join("memory.db")).unwrap();

    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}
