//! Okapi BM25 lexical index.
//!
//! Stores per-chunk term frequencies plus corpus-wide document
//! frequencies and scores a query against every chunk at once. Scores are
//! returned as a vector aligned one-to-one with the index's chunk order,
//! which is the same order as the vector index of the same instance.
//!
//! # Scoring
//!
//! ```text
//! score(D, Q) = Σ_{t ∈ Q} idf(t) · tf(t, D) · (k1 + 1)
//!                          / (tf(t, D) + k1 · (1 − b + b · |D| / avgdl))
//! idf(t)      = ln(1 + (N − n(t) + 0.5) / (n(t) + 0.5))
//! ```
//!
//! The `ln(1 + …)` form keeps idf strictly positive, so a chunk that
//! contains no query term scores exactly `0.0` and no chunk ever scores
//! below zero.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};
use crate::models::Chunk;

/// Split text into lowercase alphanumeric tokens.
///
/// Any character that is not alphanumeric (Unicode-aware) is a boundary.
/// This is the single tokenization rule for indexing and querying.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// BM25 saturation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Document-length normalization strength, in `[0, 1]`.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Params {
    /// Validate and build BM25 parameters.
    pub fn new(k1: f64, b: f64) -> Result<Self> {
        if !k1.is_finite() || k1 < 0.0 {
            return Err(RetrievalError::Configuration(format!(
                "bm25 k1 must be a finite value >= 0, got {}",
                k1
            )));
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(RetrievalError::Configuration(format!(
                "bm25 b must be in [0.0, 1.0], got {}",
                b
            )));
        }
        Ok(Self { k1, b })
    }
}

/// Term statistics for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexicalDoc {
    pub chunk_id: String,
    /// Token count.
    pub length: u32,
    /// Term → frequency. Ordered so persisted output is deterministic.
    pub terms: BTreeMap<String, u32>,
}

impl LexicalDoc {
    /// Tokenize `text` and count term frequencies.
    pub fn from_text(chunk_id: &str, text: &str) -> Self {
        let tokens = tokenize(text);
        let mut terms = BTreeMap::new();
        for t in &tokens {
            *terms.entry(t.clone()).or_insert(0u32) += 1;
        }
        Self {
            chunk_id: chunk_id.to_string(),
            length: tokens.len() as u32,
            terms,
        }
    }
}

/// BM25 index over an ordered list of chunks.
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    params: Bm25Params,
    docs: Vec<LexicalDoc>,
    doc_freq: HashMap<String, u32>,
    total_len: u64,
}

impl LexicalIndex {
    /// Create an empty index.
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            docs: Vec::new(),
            doc_freq: HashMap::new(),
            total_len: 0,
        }
    }

    /// Build an index over `chunks`, in order.
    pub fn build(params: Bm25Params, chunks: &[Chunk]) -> Self {
        let mut index = Self::new(params);
        index.add(chunks);
        index
    }

    /// Rebuild corpus statistics from persisted per-chunk term tables.
    pub fn from_docs(params: Bm25Params, docs: Vec<LexicalDoc>) -> Self {
        let mut index = Self::new(params);
        for doc in docs {
            index.push_doc(doc);
        }
        index
    }

    /// Append chunks after the existing ones.
    pub fn add(&mut self, chunks: &[Chunk]) {
        for chunk in chunks {
            self.push_doc(LexicalDoc::from_text(&chunk.id, &chunk.text));
        }
    }

    fn push_doc(&mut self, doc: LexicalDoc) {
        for term in doc.terms.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_len += doc.length as u64;
        self.docs.push(doc);
    }

    /// Drop every chunk at position `len` and beyond, updating statistics.
    pub fn truncate(&mut self, len: usize) {
        while self.docs.len() > len {
            let Some(doc) = self.docs.pop() else { break };
            for term in doc.terms.keys() {
                if let Some(n) = self.doc_freq.get_mut(term) {
                    *n -= 1;
                    if *n == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
            self.total_len -= doc.length as u64;
        }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn docs(&self) -> &[LexicalDoc] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Mean chunk length in tokens (0 for an empty index).
    pub fn avg_doc_len(&self) -> f64 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_len as f64 / self.docs.len() as f64
        }
    }

    /// Number of chunks containing `term`.
    pub fn doc_freq(&self, term: &str) -> u32 {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    /// Inverse document frequency of `term`; always positive.
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.doc_freq(term) as f64;
        let total = self.docs.len() as f64;
        (1.0 + (total - n + 0.5) / (n + 0.5)).ln()
    }

    /// Score `query` against every chunk.
    ///
    /// The returned vector has exactly [`len`](Self::len) entries, aligned
    /// with chunk order. Chunks sharing no term with the query score `0.0`.
    pub fn score(&self, query: &str) -> Vec<f64> {
        let mut scores = vec![0.0f64; self.docs.len()];
        let terms = tokenize(query);
        if terms.is_empty() || self.docs.is_empty() {
            return scores;
        }

        let avgdl = self.avg_doc_len();
        let Bm25Params { k1, b } = self.params;
        let weighted: Vec<(&str, f64)> = terms
            .iter()
            .filter(|t| self.doc_freq(t) > 0)
            .map(|t| (t.as_str(), self.idf(t)))
            .collect();

        for (score, doc) in scores.iter_mut().zip(self.docs.iter()) {
            let len_norm = if avgdl > 0.0 {
                1.0 - b + b * doc.length as f64 / avgdl
            } else {
                1.0
            };
            for (term, idf) in &weighted {
                if let Some(&tf) = doc.terms.get(*term) {
                    let tf = tf as f64;
                    *score += idf * tf * (k1 + 1.0) / (tf + k1 * len_norm);
                }
            }
        }
        scores
    }
}
