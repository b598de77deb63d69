//! Core data models shared by ingestion, indexing, and retrieval.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A source document as discovered on disk.
///
/// Immutable once ingested: a changed file is a new document version,
/// never an in-place update of an indexed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Identity: path relative to the documents root, or a bare file name.
    pub id: String,
    /// Raw UTF-8 text.
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub content_hash: String,
    /// Unix seconds at which the document was read for ingestion.
    pub ingested_at: i64,
}

impl Document {
    /// Build a document, computing its content hash.
    pub fn new(id: impl Into<String>, text: impl Into<String>, ingested_at: i64) -> Self {
        let text = text.into();
        let content_hash = sha256_hex(&text);
        Self {
            id: id.into(),
            text,
            content_hash,
            ingested_at,
        }
    }
}

/// A bounded contiguous span of a document's text; the unit of indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk UUID.
    pub id: String,
    /// Owning document identity.
    pub document_id: String,
    /// Position within the owning document, starting at 0.
    pub chunk_index: u32,
    /// Chunk text.
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// One ranked result of a hybrid query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Chunk text (possibly truncated by the caller).
    pub content: String,
    /// Owning document identity.
    pub source: String,
    /// Fused score in `[0.0, 1.0]`.
    pub score: f64,
    /// Position of the chunk within its document.
    pub chunk_index: u32,
    /// Content hash of the owning document at ingestion time.
    pub document_hash: String,
    /// Unix seconds at which the owning document was ingested.
    pub ingested_at: i64,
    /// Normalized vector similarity component.
    pub vector_score: f64,
    /// Normalized lexical component.
    pub lexical_score: f64,
}

/// SHA-256 of a string, as lowercase hex.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
