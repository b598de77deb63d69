//! Flat dense-vector index with exact nearest-neighbor search.
//!
//! Entries are kept in insertion order; that order is the chunk order
//! shared with the lexical index of the same instance. Search is a
//! brute-force scan, which is exact and fast enough for the single-machine
//! collections this engine targets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::{check_embeddings, cosine_similarity, inner_product, EmbeddingProvider};
use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, Document};

/// Similarity metric, fixed per index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cosine distance `1 − cos(a, b)`, in `[0, 2]`.
    #[default]
    Cosine,
    /// Negated dot product; unbounded.
    InnerProduct,
}

impl Metric {
    /// Distance between two vectors; smaller is nearer.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
            Metric::InnerProduct => -inner_product(a, b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "inner_product" => Ok(Metric::InnerProduct),
            other => Err(RetrievalError::Configuration(format!(
                "unknown metric '{}'; use cosine or inner_product",
                other
            ))),
        }
    }
}

/// One stored chunk: its text, provenance, and embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub chunk: Chunk,
    /// Content hash of the owning document.
    pub document_hash: String,
    /// Ingestion time of the owning document (unix seconds).
    pub ingested_at: i64,
    pub vector: Vec<f32>,
}

/// A search hit: entry position plus its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Dense vectors for every chunk of an instance, plus the embedding
/// configuration they were produced with.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    metric: Metric,
    entries: Vec<VectorEntry>,
}

impl VectorIndex {
    /// Create an empty index bound to one embedding configuration.
    pub fn new(model: impl Into<String>, dims: usize, metric: Metric) -> Result<Self> {
        if dims == 0 {
            return Err(RetrievalError::Configuration(
                "embedding dims must be > 0".to_string(),
            ));
        }
        Ok(Self {
            model: model.into(),
            dims,
            metric,
            entries: Vec::new(),
        })
    }

    /// Restore an index from persisted entries.
    ///
    /// Entries of the wrong length mean the artifact is damaged, so this
    /// reports [`RetrievalError::Corrupted`] rather than a config error.
    pub fn from_entries(
        model: impl Into<String>,
        dims: usize,
        metric: Metric,
        entries: Vec<VectorEntry>,
    ) -> Result<Self> {
        let mut index = Self::new(model, dims, metric)
            .map_err(|e| RetrievalError::Corrupted(e.to_string()))?;
        if let Some((i, bad)) = entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.vector.len() != dims)
        {
            return Err(RetrievalError::Corrupted(format!(
                "vector entry {} has {} dimensions, index declares {}",
                i,
                bad.vector.len(),
                dims
            )));
        }
        index.entries = entries;
        Ok(index)
    }

    /// Embed every chunk of `documents` and build a fresh index.
    ///
    /// Fails if the provider is unreachable or returns vectors whose
    /// dimension differs from [`EmbeddingProvider::dims`].
    pub async fn build(
        provider: &dyn EmbeddingProvider,
        metric: Metric,
        documents: &[(Document, Vec<Chunk>)],
        batch_size: usize,
    ) -> Result<Self> {
        let mut index = Self::new(provider.model_name(), provider.dims(), metric)?;
        for (doc, chunks) in documents {
            let entries = embed_chunks(provider, doc, chunks, batch_size).await?;
            index.add(entries)?;
        }
        Ok(index)
    }

    /// Append entries without touching existing vectors.
    ///
    /// All entries are validated before any is inserted, so a dimension
    /// mismatch leaves the index unchanged.
    pub fn add(&mut self, entries: Vec<VectorEntry>) -> Result<()> {
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != self.dims) {
            return Err(RetrievalError::Configuration(format!(
                "embedding dimension mismatch: index has {}, chunk {} has {}",
                self.dims,
                bad.chunk.id,
                bad.vector.len()
            )));
        }
        self.entries.extend(entries);
        Ok(())
    }

    /// Drop every entry at position `len` and beyond.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Fail unless this index was built with the given model and dims.
    pub fn check_compatible(&self, model: &str, dims: usize) -> Result<()> {
        if self.model != model || self.dims != dims {
            return Err(RetrievalError::Configuration(format!(
                "index was built with embedding model '{}' ({} dims) but the provider is '{}' ({} dims)",
                self.model, self.dims, model, dims
            )));
        }
        Ok(())
    }

    /// Return the `k` nearest entries to `query`, nearest first.
    ///
    /// When `source_filter` is set, only entries whose owning document
    /// matches it are considered, so `k` is counted against the filtered
    /// pool. Ties in distance keep insertion order.
    ///
    /// # Errors
    ///
    /// - [`RetrievalError::InvalidQuery`] if `k == 0`.
    /// - [`RetrievalError::Configuration`] if `query` has the wrong dimension.
    ///
    /// An empty index yields an empty list.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(RetrievalError::InvalidQuery("k must be >= 1".to_string()));
        }
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(RetrievalError::Configuration(format!(
                "query embedding has {} dimensions, index has {}",
                query.len(),
                self.dims
            )));
        }

        let mut neighbors: Vec<Neighbor> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| source_filter.map_or(true, |src| e.chunk.document_id == src))
            .map(|(position, e)| Neighbor {
                position,
                distance: self.metric.distance(query, &e.vector),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        neighbors.truncate(k);
        debug!(candidates = neighbors.len(), k, "vector search");
        Ok(neighbors)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn entries(&self) -> &[VectorEntry] {
        &self.entries
    }

    pub fn entry(&self, position: usize) -> Option<&VectorEntry> {
        self.entries.get(position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Embed the chunks of one document in batches of `batch_size`.
pub async fn embed_chunks(
    provider: &dyn EmbeddingProvider,
    doc: &Document,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<VectorEntry>> {
    let mut entries = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = provider.embed(&texts).await?;
        check_embeddings(&vectors, texts.len(), provider.dims())?;
        for (chunk, vector) in batch.iter().zip(vectors) {
            entries.push(VectorEntry {
                chunk: chunk.clone(),
                document_hash: doc.content_hash.clone(),
                ingested_at: doc.ingested_at,
                vector,
            });
        }
    }
    Ok(entries)
}
