//! Embedding persistence and similarity search.
//!
//! [`add`] is the sole mutation entry point besides [`delete`]. It runs the
//! full write path inside a transaction: dimensionality validation, upsert on
//! `(entity_type, entity_id)`, and cluster assignment for new records — so a
//! query issued after `add` returns always observes the written record.
//!
//! [`query`] ranks a partition by descending cosine similarity. The cluster
//! index is consulted only to prune candidates on large partitions; whenever
//! it cannot confidently produce `k` results the query falls back to an exact
//! linear scan.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;

use crate::config::IndexConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::cluster;
use crate::store::types::{EmbeddingRecord, EntityType};
use crate::vector::{cosine_similarity, decode_vector, encode_vector};

/// Result returned from an add operation.
#[derive(Debug, Serialize)]
pub struct AddOutcome {
    /// UUID of the stored record: freshly generated, or the existing id when
    /// the write updated a record in place.
    pub id: String,
    /// `true` if an existing `(entity_type, entity_id)` record was updated.
    pub updated: bool,
}

/// A single ranked query match.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Cosine similarity to the query vector, in `[-1, 1]`.
    pub similarity: f64,
}

/// Partition-level counters for diagnostics.
#[derive(Debug, Serialize)]
pub struct PartitionStats {
    pub embeddings: usize,
    pub clusters: usize,
    pub by_entity_type: HashMap<String, usize>,
    pub avg_cluster_size: f64,
}

/// Insert or update the embedding for `(entity_type, entity_id)`.
///
/// The vector's length must match the partition's established dimensionality
/// (the first insert establishes it); a mismatch is a hard error. An existing
/// record is updated in place and keeps its id and cluster assignment — the
/// assignment is advisory and a reconciliation pass re-derives it. A new
/// record is assigned to a cluster in the same transaction.
pub fn add(
    conn: &mut Connection,
    owner_id: &str,
    entity_type: EntityType,
    entity_id: &str,
    vector: &[f32],
    config: &IndexConfig,
) -> StoreResult<AddOutcome> {
    let tx = conn.transaction()?;

    if let Some(expected) = partition_dimensions(&tx, owner_id)? {
        if expected != vector.len() {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM vector_embeddings WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type.as_str(), entity_id],
            |row| row.get(0),
        )
        .optional()?;

    let outcome = if let Some(id) = existing {
        tx.execute(
            "UPDATE vector_embeddings SET vector = ?1 WHERE id = ?2",
            params![encode_vector(vector), id],
        )?;
        AddOutcome { id, updated: true }
    } else {
        let id = uuid::Uuid::now_v7().to_string();
        let cluster_id = cluster::assign_to_cluster(&tx, owner_id, vector, config)?;
        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO vector_embeddings \
             (id, owner_id, entity_type, entity_id, vector, dimensions, cluster_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                owner_id,
                entity_type.as_str(),
                entity_id,
                encode_vector(vector),
                vector.len() as i64,
                cluster_id,
                now,
            ],
        )?;
        AddOutcome { id, updated: false }
    };

    tx.commit()?;
    Ok(outcome)
}

/// Return at most `k` records from the partition ranked by descending cosine
/// similarity, ties broken by insertion order.
///
/// `k == 0` returns an empty list. An empty partition returns an empty list.
/// A query vector whose length differs from the partition's dimensionality is
/// a hard error.
pub fn query(
    conn: &Connection,
    owner_id: &str,
    query_vector: &[f32],
    k: usize,
    config: &IndexConfig,
) -> StoreResult<Vec<QueryMatch>> {
    if k == 0 {
        return Ok(Vec::new());
    }

    let Some(expected) = partition_dimensions(conn, owner_id)? else {
        return Ok(Vec::new());
    };
    if expected != query_vector.len() {
        return Err(StoreError::DimensionMismatch {
            expected,
            actual: query_vector.len(),
        });
    }

    let partition_size: usize = conn.query_row(
        "SELECT COUNT(*) FROM vector_embeddings WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get::<_, i64>(0),
    )? as usize;

    // Pruned path: scan only members of the centroids nearest the query,
    // plus any unassigned records. Falls through to the exact scan whenever
    // the index cannot confidently produce k results.
    if partition_size >= config.min_partition_for_index {
        if let Some(cluster_ids) =
            cluster::candidate_cluster_ids(conn, owner_id, query_vector, k, config)?
        {
            let pruned = scan_clusters(conn, owner_id, query_vector, &cluster_ids)?;
            if pruned.len() >= k {
                return Ok(rank(pruned, k));
            }
        }
    }

    let all = scan_partition(conn, owner_id, query_vector)?;
    Ok(rank(all, k))
}

/// Fetch the record for `(entity_type, entity_id)`, if present.
pub fn get_by_entity(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> StoreResult<Option<EmbeddingRecord>> {
    let row = conn
        .query_row(
            "SELECT id, owner_id, entity_type, entity_id, vector, dimensions, cluster_id, created_at \
             FROM vector_embeddings WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type.as_str(), entity_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((id, owner_id, type_str, entity_id, blob, dimensions, cluster_id, created_at)) = row
    else {
        return Ok(None);
    };

    Ok(Some(EmbeddingRecord {
        id,
        owner_id,
        entity_type: EntityType::from_str(&type_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        entity_id,
        vector: decode_vector(&blob)?,
        dimensions: dimensions as usize,
        cluster_id,
        created_at,
    }))
}

/// Delete the record for `(entity_type, entity_id)`.
///
/// Returns `true` if a record was removed; an absent record is a no-op. The
/// owning cluster's member count is decremented, but its centroid value is
/// left to drift until reconciliation.
pub fn delete(
    conn: &mut Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> StoreResult<bool> {
    let tx = conn.transaction()?;

    let row: Option<(String, Option<i64>)> = tx
        .query_row(
            "SELECT id, cluster_id FROM vector_embeddings \
             WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type.as_str(), entity_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((id, cluster_id)) = row else {
        return Ok(false);
    };

    tx.execute("DELETE FROM vector_embeddings WHERE id = ?1", params![id])?;
    if let Some(cluster_id) = cluster_id {
        cluster::note_member_removed(&tx, cluster_id)?;
    }

    tx.commit()?;
    Ok(true)
}

/// Resolve the entity type of a bare foreign id by scanning the partition's
/// embedding records.
///
/// Backlinks carry no type information, so this is the reverse lookup used to
/// hydrate them. Returns `None` when no record references the id — an edge to
/// nowhere, which callers prune rather than fabricate a type for.
pub fn resolve_entity_type(
    conn: &Connection,
    owner_id: &str,
    entity_id: &str,
) -> StoreResult<Option<EntityType>> {
    let type_str: Option<String> = conn
        .query_row(
            "SELECT entity_type FROM vector_embeddings \
             WHERE owner_id = ?1 AND entity_id = ?2 ORDER BY rowid LIMIT 1",
            params![owner_id, entity_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(type_str.and_then(|s| EntityType::from_str(&s).ok()))
}

/// Partition-level counters: record totals, per-type breakdown, cluster load.
pub fn stats(conn: &Connection, owner_id: &str) -> StoreResult<PartitionStats> {
    let embeddings: usize = conn.query_row(
        "SELECT COUNT(*) FROM vector_embeddings WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get::<_, i64>(0),
    )? as usize;
    let clusters: usize = conn.query_row(
        "SELECT COUNT(*) FROM vector_clusters WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get::<_, i64>(0),
    )? as usize;

    let mut by_entity_type = HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT entity_type, COUNT(*) FROM vector_embeddings \
         WHERE owner_id = ?1 GROUP BY entity_type",
    )?;
    let rows = stmt
        .query_map(params![owner_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (entity_type, count) in rows {
        by_entity_type.insert(entity_type, count);
    }

    let avg_cluster_size = if clusters == 0 {
        0.0
    } else {
        embeddings as f64 / clusters as f64
    };

    Ok(PartitionStats {
        embeddings,
        clusters,
        by_entity_type,
        avg_cluster_size,
    })
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// The partition's established dimensionality, if any record exists.
fn partition_dimensions(conn: &Connection, owner_id: &str) -> StoreResult<Option<usize>> {
    let dims: Option<i64> = conn
        .query_row(
            "SELECT dimensions FROM vector_embeddings WHERE owner_id = ?1 LIMIT 1",
            params![owner_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(dims.map(|d| d as usize))
}

/// Score every record in the partition against the query, in insertion order.
fn scan_partition(
    conn: &Connection,
    owner_id: &str,
    query_vector: &[f32],
) -> StoreResult<Vec<QueryMatch>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, entity_id, vector FROM vector_embeddings \
         WHERE owner_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map(params![owner_id], row_to_candidate)?
        .collect::<Result<Vec<_>, _>>()?;
    score_candidates(rows, query_vector)
}

/// Score members of the given clusters plus any unassigned records.
fn scan_clusters(
    conn: &Connection,
    owner_id: &str,
    query_vector: &[f32],
    cluster_ids: &[i64],
) -> StoreResult<Vec<QueryMatch>> {
    let placeholders: Vec<String> = (2..2 + cluster_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT id, entity_type, entity_id, vector FROM vector_embeddings \
         WHERE owner_id = ?1 AND (cluster_id IS NULL OR cluster_id IN ({})) \
         ORDER BY rowid",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;

    let mut bound: Vec<&dyn rusqlite::types::ToSql> = vec![&owner_id];
    for id in cluster_ids {
        bound.push(id);
    }

    let rows = stmt
        .query_map(bound.as_slice(), row_to_candidate)?
        .collect::<Result<Vec<_>, _>>()?;
    score_candidates(rows, query_vector)
}

type CandidateRow = (String, String, String, Vec<u8>);

fn row_to_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<CandidateRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn score_candidates(rows: Vec<CandidateRow>, query_vector: &[f32]) -> StoreResult<Vec<QueryMatch>> {
    let mut matches = Vec::with_capacity(rows.len());
    for (id, type_str, entity_id, blob) in rows {
        let vector = decode_vector(&blob)?;
        let entity_type =
            EntityType::from_str(&type_str).map_err(|_| rusqlite::Error::InvalidQuery)?;
        matches.push(QueryMatch {
            id,
            entity_type,
            entity_id,
            similarity: cosine_similarity(query_vector, &vector),
        });
    }
    Ok(matches)
}

/// Stable sort by descending similarity — candidates arrive in insertion
/// order, so equal similarities keep that order — then truncate to `k`.
fn rank(mut matches: Vec<QueryMatch>, k: usize) -> Vec<QueryMatch> {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(k);
    matches
}
