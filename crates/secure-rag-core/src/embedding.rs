//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, a deterministic offline [`HashProvider`], and pure helpers
//! for vector serialization and similarity computation.
//!
//! Network-backed providers (Ollama, OpenAI) live in the `secure-rag`
//! application crate.

use async_trait::async_trait;

use crate::error::{Result, RetrievalError};
use crate::lexical::tokenize;

/// Trait for embedding providers.
///
/// A provider maps text to fixed-length dense vectors. The output
/// dimension is stable for the lifetime of a provider, and an index built
/// with one provider configuration must never be queried with another.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"bge-m3:567m"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1024`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Check a provider response: one vector per input, all of `dims` length.
///
/// A count mismatch is a malformed response ([`RetrievalError::Transient`]);
/// a length mismatch means the provider is not the model the index was
/// configured for ([`RetrievalError::Configuration`]). NaN or infinite
/// components are a malformed response too.
pub fn check_embeddings(vectors: &[Vec<f32>], expected_count: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(RetrievalError::Transient(format!(
            "embedding provider returned {} vectors for {} inputs",
            vectors.len(),
            expected_count
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(RetrievalError::Configuration(format!(
            "embedding dimension mismatch: expected {}, got {}",
            dims,
            bad.len()
        )));
    }
    if let Some(i) = vectors.iter().position(|v| v.iter().any(|x| !x.is_finite())) {
        return Err(RetrievalError::Transient(format!(
            "embedding provider returned a non-finite value in vector {}",
            i
        )));
    }
    Ok(())
}

/// Deterministic feature-hashing embedder.
///
/// Each token (same tokenizer as the lexical index) is hashed with
/// FNV-1a into one of `dims` buckets with a sign bit, and the result is
/// L2-normalized. Needs no model and no network, so it backs tests and
/// air-gapped smoke runs. Semantic quality is bag-of-words at best.
#[derive(Debug, Clone)]
pub struct HashProvider {
    model: String,
    dims: usize,
}

impl HashProvider {
    /// Create a hashing provider producing `dims`-dimensional vectors.
    pub fn new(dims: usize) -> Self {
        Self {
            model: format!("hash-{}", dims),
            dims,
        }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return v;
        }
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// 64-bit FNV-1a. Stable across platforms and releases, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(PRIME))
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as little-endian f32 bytes.
///
/// Each `f32` is stored as 4 bytes, producing a blob of `vec.len() × 4`
/// bytes.
///
/// # Example
///
/// ```rust
/// use secure_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob).unwrap(), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a blob back into a float vector.
///
/// Reverses [`vec_to_blob`]. A blob whose length is not a multiple of 4
/// is structurally invalid and reported as [`RetrievalError::Corrupted`].
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(RetrievalError::Corrupted(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Plain dot product. Returns `0.0` for vectors of different lengths.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob).unwrap();
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_blob_bad_length_is_corrupted() {
        let err = blob_to_vec(&[0u8, 1, 2]).unwrap_err();
        assert!(matches!(err, RetrievalError::Corrupted(_)));
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_hash_provider_deterministic_and_normalized() {
        let p = HashProvider::new(64);
        let a = p.embed_one("Orange horse with raspberry hooves");
        let b = p.embed_one("orange HORSE with raspberry hooves");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(p.dims(), 64);
        assert_eq!(p.model_name(), "hash-64");
    }

    #[test]
    fn test_hash_provider_similarity_tracks_overlap() {
        let p = HashProvider::new(256);
        let q = p.embed_one("herring heads");
        let close = p.embed_one("a story about herring heads in the sea");
        let far = p.embed_one("kubernetes deployment manifests");
        assert!(cosine_similarity(&q, &close) > cosine_similarity(&q, &far));
    }

    #[test]
    fn test_hash_provider_empty_text_is_zero_vector() {
        let p = HashProvider::new(8);
        assert!(p.embed_one("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_check_embeddings() {
        let ok = vec![vec![0.0; 4], vec![1.0; 4]];
        assert!(check_embeddings(&ok, 2, 4).is_ok());
        assert!(matches!(
            check_embeddings(&ok, 3, 4),
            Err(RetrievalError::Transient(_))
        ));
        let bad = vec![vec![0.0; 4], vec![1.0; 3]];
        assert!(matches!(
            check_embeddings(&bad, 2, 4),
            Err(RetrievalError::Configuration(_))
        ));
    }

    #[test]
    fn test_check_embeddings_rejects_non_finite() {
        // 1e39 overflows f32 when a provider's JSON is parsed.
        let overflow = "1e39".parse::<f32>().unwrap();
        assert!(overflow.is_infinite());
        for v in [overflow, f32::NAN, f32::NEG_INFINITY] {
            let vectors = vec![vec![0.5; 4], vec![0.1, v, 0.2, 0.3]];
            let err = check_embeddings(&vectors, 2, 4).unwrap_err();
            assert!(err.is_retryable(), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_hash_provider_batch_matches_single() {
        let p = HashProvider::new(32);
        let texts = vec!["one".to_string(), "two words".to_string()];
        let out = p.embed(&texts).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], p.embed_one("two words"));
    }
}
