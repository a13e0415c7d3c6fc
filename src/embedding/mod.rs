//! Text-to-vector embedding boundary.
//!
//! The concrete embedding model (tokenizer + forward pass) is an external
//! collaborator; this core depends only on the [`Embedder`] trait, which lets
//! tests substitute a fixed-vector stub.

use anyhow::Result;

/// Trait for embedding text into fixed-length vectors.
///
/// Implementations produce vectors of exactly [`dimensions`](Embedder::dimensions)
/// components. `embed` may fail — model not loaded, text empty after
/// normalization — and callers must treat such failures as retryable, never
/// as fatal to a whole retrieval pipeline.
///
/// Methods are synchronous; callers in async contexts run them on
/// `tokio::task::spawn_blocking` since model inference can be slow.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Number of dimensions this embedder produces.
    fn dimensions(&self) -> usize;
}
