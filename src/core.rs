//! The process-wide memory handle.
//!
//! [`MemoryCore`] is constructed once at process start and passed by
//! reference to every caller — there is no ambient global state. It wires a
//! storage backend, an embedder, and an entity fetcher together and exposes
//! the asynchronous surface the rest of the application consumes. Each
//! operation runs the synchronous store on `tokio::task::spawn_blocking`,
//! since both SQLite I/O and model inference can stall an async executor.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::EngramConfig;
use crate::db;
use crate::embedding::Embedder;
use crate::error::StoreResult;
use crate::retrieval::{self, EntityFetcher};
use crate::store::{
    AddOutcome, EmbeddingRecord, EmbeddingStore, EntityType, PartitionStats, QueryMatch,
    ReconcileReport, SqliteStore,
};

/// Handle to the semantic memory core. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct MemoryCore {
    store: Arc<dyn EmbeddingStore>,
    embedder: Arc<dyn Embedder>,
    fetcher: Arc<dyn EntityFetcher>,
    config: Arc<EngramConfig>,
}

impl MemoryCore {
    /// Open the configured SQLite database and build a core around it.
    pub fn open(
        config: EngramConfig,
        embedder: Arc<dyn Embedder>,
        fetcher: Arc<dyn EntityFetcher>,
    ) -> Result<Self> {
        let conn = db::open_database(config.resolved_db_path())
            .context("failed to open memory database")?;

        // Existing vectors are unusable if the embedder's dimensionality
        // changed; they must be re-indexed before queries mix the two.
        match db::migrations::get_embedding_dimensions(&conn)? {
            Some(stored) if stored != embedder.dimensions() => {
                tracing::warn!(
                    stored,
                    current = embedder.dimensions(),
                    "embedding dimensionality changed; existing records need re-indexing"
                );
            }
            None => db::migrations::set_embedding_dimensions(&conn, embedder.dimensions())?,
            _ => {}
        }

        let store = Arc::new(SqliteStore::new(conn, config.index.clone()));
        Ok(Self::with_store(config, store, embedder, fetcher))
    }

    /// Build a core around an explicit storage backend.
    pub fn with_store(
        config: EngramConfig,
        store: Arc<dyn EmbeddingStore>,
        embedder: Arc<dyn Embedder>,
        fetcher: Arc<dyn EntityFetcher>,
    ) -> Self {
        Self {
            store,
            embedder,
            fetcher,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    /// Embed `text` and upsert the result for `(entity_type, entity_id)`.
    ///
    /// Returns the record id. An embedding failure is retryable: the caller's
    /// primary record write is the source of truth and should proceed; this
    /// derived index can be rebuilt on the next mutation.
    pub async fn index_text(
        &self,
        owner_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        text: &str,
    ) -> Result<String> {
        let store = self.store.clone();
        let embedder = self.embedder.clone();
        let (owner_id, entity_id, text) =
            (owner_id.to_string(), entity_id.to_string(), text.to_string());

        let outcome = tokio::task::spawn_blocking(move || -> Result<AddOutcome> {
            let vector = embedder.embed(&text).context("embedding failed")?;
            Ok(store.add(&owner_id, entity_type, &entity_id, &vector)?)
        })
        .await??;
        Ok(outcome.id)
    }

    /// Upsert a precomputed vector for `(entity_type, entity_id)`.
    pub async fn add(
        &self,
        owner_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        vector: Vec<f32>,
    ) -> StoreResult<AddOutcome> {
        let store = self.store.clone();
        let (owner_id, entity_id) = (owner_id.to_string(), entity_id.to_string());
        run_blocking(move || store.add(&owner_id, entity_type, &entity_id, &vector)).await
    }

    /// Top-`k` records by descending cosine similarity.
    pub async fn query(
        &self,
        owner_id: &str,
        query_vector: Vec<f32>,
        k: usize,
    ) -> StoreResult<Vec<QueryMatch>> {
        let store = self.store.clone();
        let owner_id = owner_id.to_string();
        run_blocking(move || store.query(&owner_id, &query_vector, k)).await
    }

    /// Fetch a record by its entity key.
    pub async fn get_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> StoreResult<Option<EmbeddingRecord>> {
        let store = self.store.clone();
        let entity_id = entity_id.to_string();
        run_blocking(move || store.get_by_entity(entity_type, &entity_id)).await
    }

    /// Remove a record. Absent records are a no-op.
    pub async fn delete(&self, entity_type: EntityType, entity_id: &str) -> StoreResult<bool> {
        let store = self.store.clone();
        let entity_id = entity_id.to_string();
        run_blocking(move || store.delete(entity_type, &entity_id)).await
    }

    /// Restore cluster-index invariants for a partition.
    pub async fn reconcile(&self, owner_id: &str, force: bool) -> StoreResult<ReconcileReport> {
        let store = self.store.clone();
        let owner_id = owner_id.to_string();
        run_blocking(move || store.reconcile(&owner_id, force)).await
    }

    /// Partition counters for diagnostics.
    pub async fn stats(&self, owner_id: &str) -> StoreResult<PartitionStats> {
        let store = self.store.clone();
        let owner_id = owner_id.to_string();
        run_blocking(move || store.stats(&owner_id)).await
    }

    /// Assemble the context bundle for a query. Never fails: pipeline errors
    /// collapse to a safe fallback string.
    pub async fn build_context(&self, owner_id: &str, query_text: &str) -> String {
        let store = self.store.clone();
        let embedder = self.embedder.clone();
        let fetcher = self.fetcher.clone();
        let (owner_id, query_text) = (owner_id.to_string(), query_text.to_string());

        tokio::task::spawn_blocking(move || {
            retrieval::build_context(
                store.as_ref(),
                embedder.as_ref(),
                fetcher.as_ref(),
                &owner_id,
                &query_text,
            )
        })
        .await
        .unwrap_or_else(|error| {
            tracing::warn!(%error, "context assembly task failed");
            retrieval::CONTEXT_FALLBACK.to_string()
        })
    }
}

/// Run a store closure off the async executor, preserving its typed error.
///
/// A panic inside the store task is re-raised on the caller's thread; these
/// tasks are never cancelled.
async fn run_blocking<T, F>(f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
    }
}
