//! Hybrid query engine.
//!
//! Combines dense vector similarity with BM25 lexical relevance over one
//! [`IndexInstance`]. The caller embeds the query (the only step that needs
//! I/O) and hands the vector in together with the raw query text, so both
//! scoring passes see exactly the same query.
//!
//! # Algorithm
//!
//! 1. Fetch `k × overfetch_factor` nearest candidates from the vector
//!    index, after applying the optional source filter.
//! 2. Score the whole lexical index once and pick out the candidates'
//!    scores by position.
//! 3. Normalize both components into `[0, 1]` over the candidate pool
//!    (see [`crate::fusion`]).
//! 4. Fuse with the configured weights, rank by fused score, then vector
//!    similarity, then insertion order.
//! 5. Truncate to `k`.

use std::fmt;

use tracing::debug;

use crate::error::{Result, RetrievalError};
use crate::fusion::{fuse_and_rank, normalize_lexical, vector_similarities, FusionWeights};
use crate::instance::IndexInstance;
use crate::models::SearchHit;

/// Phases a single query passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Idle,
    Embedding,
    CandidateRetrieval,
    LexicalScoring,
    Fusion,
    Ranked,
    Done,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryPhase::Idle => "idle",
            QueryPhase::Embedding => "embedding",
            QueryPhase::CandidateRetrieval => "candidate_retrieval",
            QueryPhase::LexicalScoring => "lexical_scoring",
            QueryPhase::Fusion => "fusion",
            QueryPhase::Ranked => "ranked",
            QueryPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Retrieval tuning for one query, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Results to return.
    pub k: usize,
    /// Candidate pool is `k × overfetch_factor`.
    pub overfetch_factor: usize,
    pub weights: FusionWeights,
    /// Only consider chunks of this document.
    pub source_filter: Option<String>,
}

impl SearchParams {
    pub fn new(k: usize, overfetch_factor: usize, weights: FusionWeights) -> Result<Self> {
        if k == 0 {
            return Err(RetrievalError::InvalidQuery("k must be >= 1".to_string()));
        }
        if overfetch_factor == 0 {
            return Err(RetrievalError::Configuration(
                "overfetch_factor must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            k,
            overfetch_factor,
            weights,
            source_filter: None,
        })
    }

    pub fn with_source_filter(mut self, source: Option<String>) -> Self {
        self.source_filter = source;
        self
    }

    /// Size of the vector candidate pool.
    pub fn candidate_pool(&self) -> usize {
        self.k.saturating_mul(self.overfetch_factor)
    }
}

/// Run a hybrid query against `instance`.
///
/// `query_vec` must come from the same embedding configuration the
/// instance was built with. Returns at most `k` hits, best first, with the
/// full chunk text. An empty instance returns an empty list.
pub fn hybrid_search(
    instance: &IndexInstance,
    query: &str,
    query_vec: &[f32],
    params: &SearchParams,
) -> Result<Vec<SearchHit>> {
    if params.k == 0 {
        return Err(RetrievalError::InvalidQuery("k must be >= 1".to_string()));
    }
    if instance.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = instance.vectors();

    debug!(phase = %QueryPhase::CandidateRetrieval, pool = params.candidate_pool());
    let neighbors = vectors.search(
        query_vec,
        params.candidate_pool(),
        params.source_filter.as_deref(),
    )?;
    if neighbors.is_empty() {
        return Ok(Vec::new());
    }

    debug!(phase = %QueryPhase::LexicalScoring, candidates = neighbors.len());
    let all_lexical = instance.lexical().score(query);
    let positions: Vec<usize> = neighbors.iter().map(|n| n.position).collect();
    let distances: Vec<f32> = neighbors.iter().map(|n| n.distance).collect();
    let raw_lexical: Vec<f64> = positions
        .iter()
        .map(|&p| all_lexical.get(p).copied().unwrap_or(0.0))
        .collect();

    debug!(phase = %QueryPhase::Fusion);
    let similarities = vector_similarities(vectors.metric(), &distances);
    let lexical = normalize_lexical(&raw_lexical);
    let mut ranked = fuse_and_rank(&params.weights, &positions, &similarities, &lexical);
    ranked.truncate(params.k);

    debug!(phase = %QueryPhase::Ranked, hits = ranked.len());
    let hits = ranked
        .into_iter()
        .filter_map(|c| {
            let entry = vectors.entry(c.position)?;
            Some(SearchHit {
                content: entry.chunk.text.clone(),
                source: entry.chunk.document_id.clone(),
                score: c.score,
                chunk_index: entry.chunk.chunk_index,
                document_hash: entry.document_hash.clone(),
                ingested_at: entry.ingested_at,
                vector_score: c.vector_score,
                lexical_score: c.lexical_score,
            })
        })
        .collect();
    Ok(hits)
}
