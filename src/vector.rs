//! Vector wire encoding and similarity math.
//!
//! Vectors persist as fixed-width little-endian f32 blobs. The round trip
//! (encode → decode) is bit-identical for all finite values. Cosine
//! similarity normalizes internally; zero-norm vectors compare as 0.0 with
//! everything, including themselves.

use crate::error::StoreError;

/// Encode a vector as a little-endian f32 blob.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for component in vector {
        bytes.extend_from_slice(&component.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 blob back into a vector.
///
/// A blob whose length is not a multiple of 4 is a validation error.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::MalformedVector { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity between two vectors, in `[-1, 1]`.
///
/// If either vector has zero norm the result is 0.0 — an all-zero embedding
/// is similar to nothing, itself included.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
