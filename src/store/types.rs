//! Core record type definitions.
//!
//! Defines [`EntityType`] (the closed set of record kinds that carry
//! embeddings), [`EmbeddingRecord`] (a persisted embedding row), and
//! [`ClusterCentroid`] (a cluster-index centroid row).

use serde::{Deserialize, Serialize};

/// The kind of source record an embedding was derived from.
///
/// Each tag names the external collaborator that owns the source record.
/// `Summary` is synthetic — produced by a summarization layer rather than a
/// user-owned repository — and is never hydrated during retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Project,
    Habit,
    JournalEntry,
    Appointment,
    Plan,
    Anchor,
    Note,
    Insight,
    Summary,
}

impl EntityType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Project => "project",
            Self::Habit => "habit",
            Self::JournalEntry => "journal_entry",
            Self::Appointment => "appointment",
            Self::Plan => "plan",
            Self::Anchor => "anchor",
            Self::Note => "note",
            Self::Insight => "insight",
            Self::Summary => "summary",
        }
    }

    /// All known entity types, in declaration order.
    pub const ALL: [EntityType; 10] = [
        Self::Task,
        Self::Project,
        Self::Habit,
        Self::JournalEntry,
        Self::Appointment,
        Self::Plan,
        Self::Anchor,
        Self::Note,
        Self::Insight,
        Self::Summary,
    ];
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "project" => Ok(Self::Project),
            "habit" => Ok(Self::Habit),
            "journal_entry" => Ok(Self::JournalEntry),
            "appointment" => Ok(Self::Appointment),
            "plan" => Ok(Self::Plan),
            "anchor" => Ok(Self::Anchor),
            "note" => Ok(Self::Note),
            "insight" => Ok(Self::Insight),
            "summary" => Ok(Self::Summary),
            _ => Err(format!("unknown entity type: {s}")),
        }
    }
}

/// A persisted embedding, matching the `vector_embeddings` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// UUID v7 (time-sortable) primary key, generated at insert.
    pub id: String,
    /// Owning partition. A single local user in practice, but always keyed
    /// to prevent cross-partition leakage.
    pub owner_id: String,
    /// Kind of the source record.
    pub entity_type: EntityType,
    /// Foreign identifier into the owning collaborator's storage. Opaque.
    pub entity_id: String,
    /// The embedding itself.
    pub vector: Vec<f32>,
    /// Vector length, immutable per record.
    pub dimensions: usize,
    /// Advisory back-reference to a cluster centroid. May be stale or absent;
    /// never required for correctness.
    pub cluster_id: Option<i64>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

/// A cluster-index centroid, matching the `vector_clusters` table schema.
///
/// The centroid is the running mean of its members' vectors. It is derived,
/// rebuildable state — losing it must never lose embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCentroid {
    /// Integer primary key, unique per owner partition.
    pub id: i64,
    pub owner_id: String,
    /// Mean vector of current members.
    pub centroid: Vec<f32>,
    pub dimensions: usize,
    /// Bookkeeping count of members. May drift from actual membership
    /// between reconciliation passes.
    pub member_count: i64,
    /// ISO 8601 timestamp of the last centroid update.
    pub updated_at: String,
}
