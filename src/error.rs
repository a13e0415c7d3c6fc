//! Typed errors for the embedding store's primitive operations.
//!
//! Validation failures (dimensionality mismatch, malformed vector blobs) are
//! hard errors surfaced to the caller of `add`/`query` — never silently
//! coerced. Not-found conditions are modeled as `Option`/no-op results, not
//! errors, and never appear here.

use thiserror::Error;

/// Errors produced by the embedding store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A vector's length does not match the partition's established
    /// dimensionality. The vector is rejected, never truncated or padded.
    #[error("dimension mismatch: partition expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A persisted vector blob could not be decoded as a whole number of
    /// 4-byte floats.
    #[error("malformed vector blob: {len} bytes is not a multiple of 4")]
    MalformedVector { len: usize },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
