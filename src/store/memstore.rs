//! In-memory embedding store.
//!
//! Backend for hosts without an embedded relational engine, and the simplest
//! possible reference for the store contract. Carries no cluster index —
//! every query is an exact linear scan, which is the contract's ground truth
//! anyway. Nothing survives the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::types::{EmbeddingRecord, EntityType};
use crate::store::{AddOutcome, EmbeddingStore, PartitionStats, QueryMatch, ReconcileReport};
use crate::vector::cosine_similarity;

#[derive(Clone)]
struct MemRecord {
    record: EmbeddingRecord,
    /// Monotonic insertion counter, the tie-break analogue of a rowid.
    seq: u64,
}

/// Volatile, index-free store keyed by `(entity_type, entity_id)`.
#[derive(Default)]
pub struct MemStore {
    records: RwLock<HashMap<(EntityType, String), MemRecord>>,
    next_seq: AtomicU64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition_dimensions(
        records: &HashMap<(EntityType, String), MemRecord>,
        owner_id: &str,
    ) -> Option<usize> {
        records
            .values()
            .find(|r| r.record.owner_id == owner_id)
            .map(|r| r.record.dimensions)
    }
}

impl EmbeddingStore for MemStore {
    fn add(
        &self,
        owner_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        vector: &[f32],
    ) -> StoreResult<AddOutcome> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());

        if let Some(expected) = Self::partition_dimensions(&records, owner_id) {
            if expected != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let key = (entity_type, entity_id.to_string());
        if let Some(existing) = records.get_mut(&key) {
            existing.record.vector = vector.to_vec();
            return Ok(AddOutcome {
                id: existing.record.id.clone(),
                updated: true,
            });
        }

        let id = uuid::Uuid::now_v7().to_string();
        let record = EmbeddingRecord {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            entity_type,
            entity_id: entity_id.to_string(),
            vector: vector.to_vec(),
            dimensions: vector.len(),
            cluster_id: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        records.insert(
            key,
            MemRecord {
                record,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok(AddOutcome { id, updated: false })
    }

    fn query(
        &self,
        owner_id: &str,
        query_vector: &[f32],
        k: usize,
    ) -> StoreResult<Vec<QueryMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());

        let Some(expected) = Self::partition_dimensions(&records, owner_id) else {
            return Ok(Vec::new());
        };
        if expected != query_vector.len() {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: query_vector.len(),
            });
        }

        let mut candidates: Vec<&MemRecord> = records
            .values()
            .filter(|r| r.record.owner_id == owner_id)
            .collect();
        candidates.sort_by_key(|r| r.seq);

        let mut matches: Vec<QueryMatch> = candidates
            .into_iter()
            .map(|r| QueryMatch {
                id: r.record.id.clone(),
                entity_type: r.record.entity_type,
                entity_id: r.record.entity_id.clone(),
                similarity: cosine_similarity(query_vector, &r.record.vector),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }

    fn get_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> StoreResult<Option<EmbeddingRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(&(entity_type, entity_id.to_string()))
            .map(|r| r.record.clone()))
    }

    fn delete(&self, entity_type: EntityType, entity_id: &str) -> StoreResult<bool> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        Ok(records.remove(&(entity_type, entity_id.to_string())).is_some())
    }

    fn resolve_entity_type(
        &self,
        owner_id: &str,
        entity_id: &str,
    ) -> StoreResult<Option<EntityType>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<&MemRecord> = records
            .values()
            .filter(|r| r.record.owner_id == owner_id && r.record.entity_id == entity_id)
            .collect();
        hits.sort_by_key(|r| r.seq);
        Ok(hits.first().map(|r| r.record.entity_type))
    }

    fn reconcile(&self, _owner_id: &str, _force: bool) -> StoreResult<ReconcileReport> {
        // No index to reconcile; the report is all zeros.
        Ok(ReconcileReport::default())
    }

    fn stats(&self, owner_id: &str) -> StoreResult<PartitionStats> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut by_entity_type: HashMap<String, usize> = HashMap::new();
        let mut embeddings = 0usize;
        for r in records.values() {
            if r.record.owner_id == owner_id {
                embeddings += 1;
                *by_entity_type
                    .entry(r.record.entity_type.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        Ok(PartitionStats {
            embeddings,
            clusters: 0,
            by_entity_type,
            avg_cluster_size: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_query_match_store_contract() {
        let store = MemStore::new();
        let first = store
            .add("u1", EntityType::Task, "t1", &[1.0, 0.0])
            .unwrap();
        let second = store
            .add("u1", EntityType::Task, "t1", &[0.0, 1.0])
            .unwrap();
        assert!(second.updated);
        assert_eq!(second.id, first.id);

        let record = store.get_by_entity(EntityType::Task, "t1").unwrap().unwrap();
        assert_eq!(record.vector, vec![0.0, 1.0]);
    }

    #[test]
    fn query_orders_and_partitions() {
        let store = MemStore::new();
        store.add("u1", EntityType::Task, "a", &[1.0, 0.0]).unwrap();
        store.add("u1", EntityType::Note, "b", &[0.0, 1.0]).unwrap();
        store.add("u1", EntityType::Plan, "c", &[0.9, 0.1]).unwrap();
        store.add("u2", EntityType::Task, "d", &[1.0, 0.0]).unwrap();

        let results = store.query("u1", &[1.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entity_id, "a");
        assert_eq!(results[1].entity_id, "c");
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let store = MemStore::new();
        store.add("u1", EntityType::Task, "a", &[1.0, 0.0]).unwrap();
        assert!(matches!(
            store.add("u1", EntityType::Task, "b", &[1.0, 0.0, 0.0]),
            Err(StoreError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            store.query("u1", &[1.0], 5),
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn delete_is_noop_when_absent() {
        let store = MemStore::new();
        assert!(!store.delete(EntityType::Task, "ghost").unwrap());
    }

    #[test]
    fn resolve_entity_type_scans_partition() {
        let store = MemStore::new();
        store.add("u1", EntityType::Anchor, "x", &[1.0]).unwrap();
        assert_eq!(
            store.resolve_entity_type("u1", "x").unwrap(),
            Some(EntityType::Anchor)
        );
        assert_eq!(store.resolve_entity_type("u2", "x").unwrap(), None);
    }
}
