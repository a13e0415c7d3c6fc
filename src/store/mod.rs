//! Embedding store: persistence and similarity search over owner partitions.
//!
//! The [`EmbeddingStore`] trait is the capability seam between the retrieval
//! core and a concrete storage engine. [`SqliteStore`] is the durable
//! implementation; [`MemStore`] is an index-free in-memory one for hosts
//! without an embedded relational engine (and for tests). Both honor the same
//! contract: upsert on `(entity_type, entity_id)`, exact cosine top-K with
//! insertion-order ties, no-op deletes of absent records.

pub mod cluster;
pub mod embeddings;
pub mod memstore;
pub mod types;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub use cluster::ReconcileReport;
pub use embeddings::{AddOutcome, PartitionStats, QueryMatch};
pub use memstore::MemStore;
pub use types::{ClusterCentroid, EmbeddingRecord, EntityType};

use crate::config::IndexConfig;
use crate::error::StoreResult;

/// Storage backend contract for embedding records.
///
/// Implementations are interchangeable at construction time; the rest of the
/// core never sees past this trait. Methods are synchronous — async callers
/// bridge via `tokio::task::spawn_blocking` (see `MemoryCore`).
pub trait EmbeddingStore: Send + Sync {
    /// Insert or update the embedding for `(entity_type, entity_id)`.
    /// Dimensionality mismatch against the partition is a hard error.
    fn add(
        &self,
        owner_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        vector: &[f32],
    ) -> StoreResult<AddOutcome>;

    /// Top-`k` records by descending cosine similarity. `k == 0` → empty.
    fn query(
        &self,
        owner_id: &str,
        query_vector: &[f32],
        k: usize,
    ) -> StoreResult<Vec<QueryMatch>>;

    /// Fetch a record by its entity key, if present.
    fn get_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> StoreResult<Option<EmbeddingRecord>>;

    /// Remove a record. Absent records are a no-op (`false`).
    fn delete(&self, entity_type: EntityType, entity_id: &str) -> StoreResult<bool>;

    /// Reverse lookup: the entity type recorded for a bare foreign id.
    fn resolve_entity_type(
        &self,
        owner_id: &str,
        entity_id: &str,
    ) -> StoreResult<Option<EntityType>>;

    /// Restore cluster-index invariants for a partition.
    fn reconcile(&self, owner_id: &str, force: bool) -> StoreResult<ReconcileReport>;

    /// Partition-level counters for diagnostics.
    fn stats(&self, owner_id: &str) -> StoreResult<PartitionStats>;
}

/// SQLite-backed store: the system of record.
///
/// Wraps a single connection behind a mutex — the practical model is a single
/// writer per partition, and WAL keeps concurrent readers cheap.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    index: IndexConfig,
}

impl SqliteStore {
    /// Wrap an opened connection (see [`crate::db::open_database`]).
    pub fn new(conn: Connection, index: IndexConfig) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            index,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-statement; the transaction was
        // rolled back, so the data is consistent and the store stays usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EmbeddingStore for SqliteStore {
    fn add(
        &self,
        owner_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        vector: &[f32],
    ) -> StoreResult<AddOutcome> {
        let mut conn = self.lock();
        embeddings::add(&mut conn, owner_id, entity_type, entity_id, vector, &self.index)
    }

    fn query(
        &self,
        owner_id: &str,
        query_vector: &[f32],
        k: usize,
    ) -> StoreResult<Vec<QueryMatch>> {
        let conn = self.lock();
        embeddings::query(&conn, owner_id, query_vector, k, &self.index)
    }

    fn get_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> StoreResult<Option<EmbeddingRecord>> {
        let conn = self.lock();
        embeddings::get_by_entity(&conn, entity_type, entity_id)
    }

    fn delete(&self, entity_type: EntityType, entity_id: &str) -> StoreResult<bool> {
        let mut conn = self.lock();
        embeddings::delete(&mut conn, entity_type, entity_id)
    }

    fn resolve_entity_type(
        &self,
        owner_id: &str,
        entity_id: &str,
    ) -> StoreResult<Option<EntityType>> {
        let conn = self.lock();
        embeddings::resolve_entity_type(&conn, owner_id, entity_id)
    }

    fn reconcile(&self, owner_id: &str, force: bool) -> StoreResult<ReconcileReport> {
        let mut conn = self.lock();
        cluster::reconcile(&mut conn, owner_id, &self.index, force)
    }

    fn stats(&self, owner_id: &str) -> StoreResult<PartitionStats> {
        let conn = self.lock();
        embeddings::stats(&conn, owner_id)
    }
}
