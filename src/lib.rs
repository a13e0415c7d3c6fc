//! Engram — an embedded semantic memory core.
//!
//! Engram stores fixed-length embeddings for a single local user's records,
//! answers cosine-similarity nearest-neighbor queries over them, and
//! assembles a deduplicated, graph-expanded context bundle for a downstream
//! generative step. It is an in-process library: no server, no CLI, no
//! replication — just correctness on call.
//!
//! # Architecture
//!
//! - **Storage**: SQLite via the [`store::EmbeddingStore`] capability trait;
//!   vectors persist as little-endian f32 blobs, exact round trip guaranteed.
//!   An in-memory backend covers hosts without an embedded engine.
//! - **Search**: exact cosine ranking with stable insertion-order ties. An
//!   advisory cluster index (incremental k-means-style centroids) prunes
//!   candidates on large partitions and falls back to a full scan whenever
//!   it cannot confidently answer.
//! - **Retrieval**: query embedding → top-5 matches → entity hydration →
//!   one-hop backlink expansion → deduplication → formatted bundle, with a
//!   safe fallback at the pipeline boundary.
//! - **Collaborators**: the embedding model ([`embedding::Embedder`]) and the
//!   record repositories ([`retrieval::EntityFetcher`]) are external; this
//!   core depends only on their traits.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite initialization, schema, and migrations
//! - [`vector`] — Vector wire codec and cosine similarity
//! - [`store`] — Embedding persistence, similarity search, cluster index
//! - [`embedding`] — Text-to-vector collaborator boundary
//! - [`retrieval`] — Context assembly pipeline
//! - [`core`] — The [`core::MemoryCore`] handle wiring it all together

pub mod config;
pub mod core;
pub mod db;
pub mod embedding;
pub mod error;
pub mod retrieval;
pub mod store;
pub mod vector;

pub use crate::core::MemoryCore;
pub use config::EngramConfig;
pub use error::{StoreError, StoreResult};
