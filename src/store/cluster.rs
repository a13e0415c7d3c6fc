//! Incremental cluster index over the embedding partition.
//!
//! Each embedding is assigned to the nearest of a bounded set of centroids at
//! insert time; centroids track the running mean of their members. The index
//! is advisory infrastructure: it may only prune query candidates, it is
//! never the system of record, and losing or corrupting it degrades search
//! to a correct-but-slower linear scan.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::config::IndexConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::types::ClusterCentroid;
use crate::vector::{cosine_similarity, decode_vector, encode_vector};

/// Report returned from a reconciliation pass.
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    /// Centroids recomputed from scratch over their current members.
    pub clusters_recomputed: usize,
    /// Empty centroids removed.
    pub clusters_removed: usize,
    /// Records whose `cluster_id` pointed at a missing centroid.
    pub orphans_detached: usize,
    /// Unassigned records re-assigned to a centroid.
    pub orphans_reassigned: usize,
}

/// Load all centroids for a partition, in id order.
pub fn load_centroids(conn: &Connection, owner_id: &str) -> StoreResult<Vec<ClusterCentroid>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, centroid, dimensions, member_count, updated_at \
         FROM vector_clusters WHERE owner_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![owner_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut centroids = Vec::with_capacity(rows.len());
    for (id, owner_id, blob, dimensions, member_count, updated_at) in rows {
        centroids.push(ClusterCentroid {
            id,
            owner_id,
            centroid: decode_vector(&blob)?,
            dimensions: dimensions as usize,
            member_count,
            updated_at,
        });
    }
    Ok(centroids)
}

/// Assign a newly inserted vector to a cluster, creating one if needed.
///
/// Compares against every centroid in the partition and joins the nearest
/// when its similarity clears the acceptance threshold. Below the threshold
/// a fresh centroid is seeded at the vector — unless the partition already
/// holds `max_clusters` centroids, in which case the nearest wins regardless.
/// Returns the cluster id.
pub fn assign_to_cluster(
    conn: &Connection,
    owner_id: &str,
    vector: &[f32],
    config: &IndexConfig,
) -> StoreResult<i64> {
    let centroids = load_centroids(conn, owner_id)?;

    let nearest = centroids
        .iter()
        .filter(|c| c.dimensions == vector.len())
        .map(|c| (c, cosine_similarity(vector, &c.centroid)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    match nearest {
        Some((centroid, similarity))
            if similarity >= config.acceptance_threshold
                || centroids.len() >= config.max_clusters =>
        {
            join_cluster(conn, centroid, vector)
        }
        _ => create_cluster(conn, owner_id, vector),
    }
}

/// Fold a new member into a centroid's running mean and bump its count.
fn join_cluster(
    conn: &Connection,
    centroid: &ClusterCentroid,
    vector: &[f32],
) -> StoreResult<i64> {
    let n = centroid.member_count.max(0) as f32;
    let updated: Vec<f32> = centroid
        .centroid
        .iter()
        .zip(vector.iter())
        .map(|(c, v)| c + (v - c) / (n + 1.0))
        .collect();

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE vector_clusters \
         SET centroid = ?1, member_count = member_count + 1, updated_at = ?2 \
         WHERE id = ?3",
        params![encode_vector(&updated), now, centroid.id],
    )?;
    Ok(centroid.id)
}

/// Seed a new centroid at the given vector with a single member.
fn create_cluster(conn: &Connection, owner_id: &str, vector: &[f32]) -> StoreResult<i64> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO vector_clusters (owner_id, centroid, dimensions, member_count, updated_at) \
         VALUES (?1, ?2, ?3, 1, ?4)",
        params![owner_id, encode_vector(vector), vector.len() as i64, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Bookkeeping for a deleted member: decrement the count, never below zero.
///
/// The centroid value is deliberately not adjusted — backing a member out of
/// a running mean is lossy. Drift accumulates until a reconciliation pass
/// recomputes the centroid from its surviving members.
pub fn note_member_removed(conn: &Connection, cluster_id: i64) -> StoreResult<()> {
    conn.execute(
        "UPDATE vector_clusters SET member_count = MAX(member_count - 1, 0) WHERE id = ?1",
        params![cluster_id],
    )?;
    Ok(())
}

/// Rank centroids against a query vector and pick enough of the nearest ones
/// to cover roughly `k × candidate_multiplier` member records.
///
/// Returns `None` when the partition has no usable centroids, in which case
/// the caller must scan linearly.
pub fn candidate_cluster_ids(
    conn: &Connection,
    owner_id: &str,
    query: &[f32],
    k: usize,
    config: &IndexConfig,
) -> StoreResult<Option<Vec<i64>>> {
    let centroids = load_centroids(conn, owner_id)?;
    let mut ranked: Vec<(i64, i64, f64)> = centroids
        .iter()
        .filter(|c| c.dimensions == query.len())
        .map(|c| (c.id, c.member_count, cosine_similarity(query, &c.centroid)))
        .collect();
    if ranked.is_empty() {
        return Ok(None);
    }
    ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let wanted = (k * config.candidate_multiplier) as i64;
    let mut ids = Vec::new();
    let mut covered = 0i64;
    for (id, member_count, _) in ranked {
        ids.push(id);
        covered += member_count.max(0);
        if covered >= wanted {
            break;
        }
    }
    Ok(Some(ids))
}

/// Reconcile the cluster index with actual membership.
///
/// Detaches records pointing at missing centroids, drops empty centroids,
/// restores exact `member_count` equality, recomputes drifted centroids from
/// their current members (all of them when `force` is set), and re-assigns
/// unattached records. Invisible to queries: before, during, and after, the
/// store answers correctly via its linear-scan fallback.
pub fn reconcile(
    conn: &mut Connection,
    owner_id: &str,
    config: &IndexConfig,
    force: bool,
) -> StoreResult<ReconcileReport> {
    let tx = conn.transaction()?;
    let mut report = ReconcileReport::default();

    // 1. Detach records referencing centroids that no longer exist.
    report.orphans_detached = tx.execute(
        "UPDATE vector_embeddings SET cluster_id = NULL \
         WHERE owner_id = ?1 AND cluster_id IS NOT NULL \
           AND cluster_id NOT IN (SELECT id FROM vector_clusters WHERE owner_id = ?1)",
        params![owner_id],
    )?;

    // 2. Recount, recompute, or remove each centroid.
    let centroids = load_centroids(&tx, owner_id)?;
    let now = chrono::Utc::now().to_rfc3339();
    for centroid in &centroids {
        let members = member_vectors(&tx, owner_id, centroid.id)?;
        let actual = members.len() as i64;

        if actual == 0 {
            tx.execute(
                "DELETE FROM vector_clusters WHERE id = ?1",
                params![centroid.id],
            )?;
            report.clusters_removed += 1;
            continue;
        }

        let drift = (centroid.member_count - actual).abs() as f64 / actual as f64;
        if force || drift > config.drift_ratio {
            let mean = mean_vector(&members, centroid.dimensions);
            tx.execute(
                "UPDATE vector_clusters SET centroid = ?1, member_count = ?2, updated_at = ?3 \
                 WHERE id = ?4",
                params![encode_vector(&mean), actual, now, centroid.id],
            )?;
            report.clusters_recomputed += 1;
        } else if centroid.member_count != actual {
            tx.execute(
                "UPDATE vector_clusters SET member_count = ?1, updated_at = ?2 WHERE id = ?3",
                params![actual, now, centroid.id],
            )?;
        }
    }

    // 3. Re-attach unassigned records.
    let orphans: Vec<(String, Vec<u8>)> = {
        let mut stmt = tx.prepare(
            "SELECT id, vector FROM vector_embeddings \
             WHERE owner_id = ?1 AND cluster_id IS NULL ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![owner_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    for (record_id, blob) in orphans {
        let vector = decode_vector(&blob)?;
        let cluster_id = assign_to_cluster(&tx, owner_id, &vector, config)?;
        tx.execute(
            "UPDATE vector_embeddings SET cluster_id = ?1 WHERE id = ?2",
            params![cluster_id, record_id],
        )?;
        report.orphans_reassigned += 1;
    }

    tx.commit()?;
    tracing::debug!(
        owner = owner_id,
        recomputed = report.clusters_recomputed,
        removed = report.clusters_removed,
        detached = report.orphans_detached,
        reassigned = report.orphans_reassigned,
        "cluster index reconciled"
    );
    Ok(report)
}

/// Fetch the decoded vectors of a centroid's current members.
fn member_vectors(
    conn: &Connection,
    owner_id: &str,
    cluster_id: i64,
) -> StoreResult<Vec<Vec<f32>>> {
    let mut stmt = conn.prepare(
        "SELECT vector FROM vector_embeddings \
         WHERE owner_id = ?1 AND cluster_id = ?2 ORDER BY rowid",
    )?;
    let blobs: Vec<Vec<u8>> = stmt
        .query_map(params![owner_id, cluster_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    blobs.iter().map(|b| decode_vector(b)).collect()
}

/// Exact component-wise mean of a non-empty set of vectors.
fn mean_vector(vectors: &[Vec<f32>], dimensions: usize) -> Vec<f32> {
    let mut sum = vec![0.0f64; dimensions];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += f64::from(*x);
        }
    }
    let n = vectors.len() as f64;
    sum.into_iter().map(|x| (x / n) as f32).collect()
}

/// Look up a centroid's recorded member count, for invariant checks.
pub fn recorded_member_count(conn: &Connection, cluster_id: i64) -> StoreResult<Option<i64>> {
    conn.query_row(
        "SELECT member_count FROM vector_clusters WHERE id = ?1",
        params![cluster_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_config() -> IndexConfig {
        IndexConfig {
            acceptance_threshold: 0.6,
            max_clusters: 8,
            min_partition_for_index: 0,
            candidate_multiplier: 4,
            drift_ratio: 0.25,
        }
    }

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    #[test]
    fn first_vector_seeds_a_cluster() {
        let conn = test_db();
        let id = assign_to_cluster(&conn, "u1", &[1.0, 0.0], &test_config()).unwrap();

        let centroids = load_centroids(&conn, "u1").unwrap();
        assert_eq!(centroids.len(), 1);
        assert_eq!(centroids[0].id, id);
        assert_eq!(centroids[0].member_count, 1);
        assert_eq!(centroids[0].centroid, vec![1.0, 0.0]);
    }

    #[test]
    fn similar_vector_joins_and_updates_running_mean() {
        let conn = test_db();
        let config = test_config();
        let first = assign_to_cluster(&conn, "u1", &[1.0, 0.0], &config).unwrap();

        let joined = assign_to_cluster(&conn, "u1", &[0.8, 0.2], &config).unwrap();
        assert_eq!(joined, first);

        let centroids = load_centroids(&conn, "u1").unwrap();
        let c = centroids.iter().find(|c| c.id == first).unwrap();
        assert_eq!(c.member_count, 2);
        // mean of [1,0] and [0.8,0.2]
        assert!((c.centroid[0] - 0.9).abs() < 1e-6);
        assert!((c.centroid[1] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn dissimilar_vector_creates_new_cluster() {
        let conn = test_db();
        let config = test_config();
        let a = assign_to_cluster(&conn, "u1", &[1.0, 0.0], &config).unwrap();
        let b = assign_to_cluster(&conn, "u1", &[0.0, 1.0], &config).unwrap();
        assert_ne!(a, b);
        assert_eq!(load_centroids(&conn, "u1").unwrap().len(), 2);
    }

    #[test]
    fn cluster_cap_forces_nearest_assignment() {
        let conn = test_db();
        let mut config = test_config();
        config.max_clusters = 1;

        let a = assign_to_cluster(&conn, "u1", &[1.0, 0.0], &config).unwrap();
        // Orthogonal, but the cap is hit — joins the only cluster anyway
        let b = assign_to_cluster(&conn, "u1", &[0.0, 1.0], &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(load_centroids(&conn, "u1").unwrap().len(), 1);
    }

    #[test]
    fn partitions_do_not_share_clusters() {
        let conn = test_db();
        let config = test_config();
        assign_to_cluster(&conn, "u1", &[1.0, 0.0], &config).unwrap();
        let other = assign_to_cluster(&conn, "u2", &[1.0, 0.0], &config).unwrap();

        let u2 = load_centroids(&conn, "u2").unwrap();
        assert_eq!(u2.len(), 1);
        assert_eq!(u2[0].id, other);
        assert_eq!(load_centroids(&conn, "u1").unwrap().len(), 1);
    }

    #[test]
    fn member_removed_never_goes_negative() {
        let conn = test_db();
        let id = assign_to_cluster(&conn, "u1", &[1.0, 0.0], &test_config()).unwrap();
        note_member_removed(&conn, id).unwrap();
        note_member_removed(&conn, id).unwrap();
        assert_eq!(recorded_member_count(&conn, id).unwrap(), Some(0));
    }

    #[test]
    fn candidate_ids_cover_a_multiple_of_k() {
        let conn = test_db();
        let config = test_config();
        // Two orthogonal clusters with one member each
        assign_to_cluster(&conn, "u1", &[1.0, 0.0], &config).unwrap();
        assign_to_cluster(&conn, "u1", &[0.0, 1.0], &config).unwrap();

        // k=1, multiplier=4 → needs 4 expected members → both clusters selected
        let ids = candidate_cluster_ids(&conn, "u1", &[1.0, 0.0], 1, &config)
            .unwrap()
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn candidate_ids_none_without_centroids() {
        let conn = test_db();
        let ids = candidate_cluster_ids(&conn, "u1", &[1.0, 0.0], 5, &test_config()).unwrap();
        assert!(ids.is_none());
    }

    #[test]
    fn reconcile_removes_empty_clusters() {
        let mut conn = test_db();
        let config = test_config();
        // Centroid with no actual members
        assign_to_cluster(&conn, "u1", &[1.0, 0.0], &config).unwrap();

        let report = reconcile(&mut conn, "u1", &config, false).unwrap();
        assert_eq!(report.clusters_removed, 1);
        assert!(load_centroids(&conn, "u1").unwrap().is_empty());
    }
}
