//! Context assembly: query embedding → top-K search → hydration → one-hop
//! link expansion → deduplication → formatted bundle.
//!
//! [`build_context`] is the pipeline boundary for a downstream generative
//! step. Per-item failures (a record that won't hydrate, a backlink that
//! resolves to nothing) are skipped; any unexpected failure is caught here
//! and converted to a safe fallback string, never propagated — retrieval
//! must not crash its caller.

use anyhow::Result;
use std::collections::HashSet;

use crate::embedding::Embedder;
use crate::store::{EmbeddingStore, EntityType, QueryMatch};

/// Fixed number of core matches retrieved per query. Deliberately constant:
/// it bounds the prompt size of the downstream generative step.
pub const CONTEXT_TOP_K: usize = 5;

/// Returned when the pipeline completes but nothing was retrieved.
pub const NO_CONTEXT_FOUND: &str = "no relevant historical context found";

/// Returned when the pipeline itself failed. Distinct from the empty result.
pub const CONTEXT_FALLBACK: &str =
    "historical context is temporarily unavailable";

/// A hydrated source record, produced by the entity fetcher. Transient —
/// never persisted.
#[derive(Debug, Clone)]
pub struct RetrievedEntity {
    pub id: String,
    pub entity_type: EntityType,
    /// Human-readable rendering of the source record.
    pub text: String,
    /// Foreign ids this record declares as related — its outgoing edges in
    /// the implicit knowledge graph.
    pub linked_object_ids: Vec<String>,
}

/// Collaborator that hydrates entity ids into readable records.
///
/// Treated as slow, failure-prone I/O: a `None` is an absent record, an `Err`
/// is an infrastructure failure. The assembler skips either.
pub trait EntityFetcher: Send + Sync {
    fn fetch_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<RetrievedEntity>>;
}

/// Assemble the context bundle for `query_text` in the owner's partition.
///
/// Never fails: pipeline errors are logged and collapse to
/// [`CONTEXT_FALLBACK`]; an empty result is the distinct
/// [`NO_CONTEXT_FOUND`] message.
pub fn build_context(
    store: &dyn EmbeddingStore,
    embedder: &dyn Embedder,
    fetcher: &dyn EntityFetcher,
    owner_id: &str,
    query_text: &str,
) -> String {
    match assemble(store, embedder, fetcher, owner_id, query_text) {
        Ok(bundle) => bundle,
        Err(error) => {
            tracing::warn!(owner = owner_id, %error, "context assembly failed");
            CONTEXT_FALLBACK.to_string()
        }
    }
}

/// The fallible pipeline behind [`build_context`].
fn assemble(
    store: &dyn EmbeddingStore,
    embedder: &dyn Embedder,
    fetcher: &dyn EntityFetcher,
    owner_id: &str,
    query_text: &str,
) -> Result<String> {
    // 1. Embed the query.
    let query_vector = embedder.embed(query_text)?;

    // 2. Top-K similarity search; summaries are not hydratable source records.
    let matches: Vec<QueryMatch> = store
        .query(owner_id, &query_vector, CONTEXT_TOP_K)?
        .into_iter()
        .filter(|m| m.entity_type != EntityType::Summary)
        .collect();

    // 3. Hydrate core matches, skipping individual fetch failures.
    let mut core: Vec<RetrievedEntity> = Vec::new();
    for m in &matches {
        match fetcher.fetch_entity(m.entity_type, &m.entity_id) {
            Ok(Some(entity)) => core.push(entity),
            Ok(None) => {
                tracing::debug!(entity = %m.entity_id, "matched record no longer exists");
            }
            Err(error) => {
                tracing::debug!(entity = %m.entity_id, %error, "skipping unfetchable match");
            }
        }
    }

    if core.is_empty() {
        return Ok(NO_CONTEXT_FOUND.to_string());
    }

    // 4. One-hop link expansion with two dedup layers: linked ids already
    //    among the core matches are dropped, and each id is fetched once.
    let core_ids: HashSet<&str> = core.iter().map(|e| e.id.as_str()).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut linked: Vec<RetrievedEntity> = Vec::new();
    for entity in &core {
        for linked_id in &entity.linked_object_ids {
            if core_ids.contains(linked_id.as_str()) || !seen.insert(linked_id.clone()) {
                continue;
            }
            // Backlinks carry no type; resolve by reverse lookup, and prune
            // edges to nowhere.
            let Some(entity_type) = store.resolve_entity_type(owner_id, linked_id)? else {
                continue;
            };
            if let Ok(Some(entity)) = fetcher.fetch_entity(entity_type, linked_id) {
                linked.push(entity);
            }
        }
    }

    Ok(render(&core, &linked))
}

/// Render the bundle: core matches in ranked order, then linked records in
/// discovery order (they carry no similarity score, so no re-ranking).
fn render(core: &[RetrievedEntity], linked: &[RetrievedEntity]) -> String {
    let mut out = String::from("Core retrieved memories:\n");
    for (i, entity) in core.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}] {}\n",
            i + 1,
            entity.entity_type,
            entity.text
        ));
    }
    if !linked.is_empty() {
        out.push_str("\nConnected memories:\n");
        for entity in linked {
            out.push_str(&format!("- [{}] {}\n", entity.entity_type, entity.text));
        }
    }
    out
}
