#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use engram::config::{EngramConfig, IndexConfig};
use engram::db;
use engram::embedding::Embedder;
use engram::retrieval::{EntityFetcher, RetrievedEntity};
use engram::store::{EmbeddingStore, EntityType, SqliteStore};
use engram::MemoryCore;

pub const DIMS: usize = 8;

/// Index knobs that never defer the cluster index, so tests exercise it.
pub fn test_index_config() -> IndexConfig {
    IndexConfig {
        acceptance_threshold: 0.6,
        max_clusters: 16,
        min_partition_for_index: 0,
        candidate_multiplier: 4,
        drift_ratio: 0.25,
    }
}

/// Fresh in-memory SQLite store with schema and migrations applied.
pub fn test_store() -> SqliteStore {
    let conn = db::open_memory_database().unwrap();
    SqliteStore::new(conn, test_index_config())
}

/// Deterministic embedding with a spike at position `seed`. Distinct seeds
/// produce orthogonal vectors.
pub fn spike(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[seed % DIMS] = 1.0;
    v
}

/// An embedding with high cosine similarity to `spike(seed)`.
pub fn near_spike(seed: usize) -> Vec<f32> {
    let mut v = spike(seed);
    v[(seed + 1) % DIMS] = 0.2;
    v
}

/// Embedder that maps registered texts to spike vectors; unknown text embeds
/// at spike 0. Can be switched into a failing mode.
#[derive(Default)]
pub struct StubEmbedder {
    mapping: Mutex<HashMap<String, usize>>,
    pub fail: bool,
}

impl StubEmbedder {
    pub fn map(&self, text: &str, seed: usize) {
        self.mapping.lock().unwrap().insert(text.to_string(), seed);
    }
}

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            bail!("model not loaded");
        }
        let seed = self.mapping.lock().unwrap().get(text).copied().unwrap_or(0);
        Ok(spike(seed))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Fetcher backed by a map of prebuilt entities; ids in `failing` error out.
#[derive(Default)]
pub struct StubFetcher {
    entities: Mutex<HashMap<String, RetrievedEntity>>,
    pub failing: Mutex<HashSet<String>>,
}

impl StubFetcher {
    pub fn insert(&self, id: &str, entity_type: EntityType, text: &str, links: &[&str]) {
        self.entities.lock().unwrap().insert(
            id.to_string(),
            RetrievedEntity {
                id: id.to_string(),
                entity_type,
                text: text.to_string(),
                linked_object_ids: links.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn fail_on(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }
}

impl EntityFetcher for StubFetcher {
    fn fetch_entity(
        &self,
        _entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<RetrievedEntity>> {
        if self.failing.lock().unwrap().contains(entity_id) {
            bail!("fetch failed: {entity_id}");
        }
        Ok(self.entities.lock().unwrap().get(entity_id).cloned())
    }
}

/// A fully wired core over an in-memory SQLite store and the given stubs.
pub fn test_core(embedder: Arc<StubEmbedder>, fetcher: Arc<StubFetcher>) -> MemoryCore {
    let mut config = EngramConfig::default();
    config.embedding.dimensions = DIMS;
    config.index = test_index_config();
    let store: Arc<dyn EmbeddingStore> = Arc::new(test_store());
    MemoryCore::with_store(config, store, embedder, fetcher)
}
