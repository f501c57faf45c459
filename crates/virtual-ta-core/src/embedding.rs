//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! the [`embed_query`] wrapper that turns a question into a validated
//! query vector, and pure helpers for BLOB encoding and cosine similarity.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `virtual-ta`
//! app crate.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Trait for embedding backends.
///
/// The store must have been embedded with the same model, so
/// [`model_name`](Embedder::model_name) and [`dims`](Embedder::dims) are
/// checked against the knowledge-base metadata at load time.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Embed a single query string into a validated `f64` vector.
///
/// Input longer than `max_input_chars` characters is silently truncated at
/// a character boundary; the prefix is what gets embedded.
///
/// # Errors
///
/// - [`EmbeddingError::EmptyInput`] if `text` is blank.
/// - Whatever the backend reports (usually [`EmbeddingError::Unavailable`]).
/// - [`EmbeddingError::DimensionMismatch`] if the backend returns a vector
///   whose length differs from [`Embedder::dims`].
/// - [`EmbeddingError::NonFinite`] for NaN or infinite components.
pub async fn embed_query(
    embedder: &dyn Embedder,
    text: &str,
    max_input_chars: usize,
) -> Result<Vec<f64>, EmbeddingError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }

    let input = truncate_chars(trimmed, max_input_chars);
    if input.len() < trimmed.len() {
        tracing::debug!(
            max_input_chars,
            original_bytes = trimmed.len(),
            "query truncated before embedding"
        );
    }

    let vectors = embedder.embed_batch(&[input.to_string()]).await?;
    let vector = vectors
        .into_iter()
        .next()
        .ok_or_else(|| EmbeddingError::Unavailable("empty embedding response".to_string()))?;

    if vector.len() != embedder.dims() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: embedder.dims(),
            found: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::NonFinite);
    }

    Ok(widen(&vector))
}

/// Widen an `f32` model vector to the `f64` used for all similarity math.
pub fn widen(vec: &[f32]) -> Vec<f64> {
    vec.iter().map(|&v| v as f64).collect()
}

/// Return the longest prefix of `text` holding at most `max_chars` chars.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use virtual_ta_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), Some(v));
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]. Returns `None` when the byte length is not a
/// multiple of 4, which indicates a corrupt row.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Compute cosine similarity between two vectors in double precision.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` when either vector has zero norm (including the zero
/// query vector), when the vectors are empty, or when their lengths differ.
/// The result is clamped to `[-1.0, 1.0]` to absorb rounding error.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder {
        dims: usize,
        output: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| self.output.clone()).collect())
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), Some(vec));
    }

    #[test]
    fn test_blob_bad_length() {
        assert_eq!(blob_to_vec(&[0u8, 1, 2]), None);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-12);
    }

    #[test]
    fn test_cosine_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_zero_norm_query() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.3, 0.4]), 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[tokio::test]
    async fn test_embed_query_rejects_blank() {
        let e = FixedEmbedder {
            dims: 2,
            output: vec![1.0, 0.0],
        };
        let err = embed_query(&e, "   ", 100).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::EmptyInput));
    }

    #[tokio::test]
    async fn test_embed_query_checks_dims() {
        let e = FixedEmbedder {
            dims: 3,
            output: vec![1.0, 0.0],
        };
        let err = embed_query(&e, "question", 100).await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 3,
                found: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_embed_query_rejects_nan() {
        let e = FixedEmbedder {
            dims: 2,
            output: vec![f32::NAN, 0.0],
        };
        let err = embed_query(&e, "question", 100).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::NonFinite));
    }

    #[tokio::test]
    async fn test_embed_query_widens() {
        let e = FixedEmbedder {
            dims: 2,
            output: vec![0.5, -0.25],
        };
        let v = embed_query(&e, "question", 100).await.unwrap();
        assert_eq!(v, vec![0.5f64, -0.25]);
    }
}
