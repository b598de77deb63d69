//! Score normalization and weighted fusion.
//!
//! Vector distances and BM25 scores live on different scales. Both are
//! mapped into `[0, 1]` over the candidate pool and then combined with a
//! fixed weighted sum:
//!
//! ```text
//! fused = w_vector · vector_similarity + w_lexical · lexical_norm
//! ```
//!
//! | Metric          | vector_similarity                              |
//! |-----------------|------------------------------------------------|
//! | cosine          | `1 − d/2` (so `(1 + cos)/2`)                   |
//! | inner product   | min-max over the pool, nearest = 1.0           |
//!
//! `lexical_norm` is the BM25 score divided by the pool maximum; a pool
//! with no lexical match stays all zeros.

use std::cmp::Ordering;

use crate::error::{Result, RetrievalError};
use crate::vector::Metric;

/// Allowed slack when checking that the weights sum to one.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Validated fusion weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    vector: f64,
    lexical: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            lexical: 0.3,
        }
    }
}

impl FusionWeights {
    /// # Errors
    ///
    /// [`RetrievalError::Configuration`] unless both weights are in
    /// `[0, 1]` and sum to `1.0` within [`WEIGHT_TOLERANCE`].
    pub fn new(vector: f64, lexical: f64) -> Result<Self> {
        for (name, w) in [("vector_weight", vector), ("lexical_weight", lexical)] {
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                return Err(RetrievalError::Configuration(format!(
                    "{} must be in [0.0, 1.0], got {}",
                    name, w
                )));
            }
        }
        if (vector + lexical - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(RetrievalError::Configuration(format!(
                "vector_weight + lexical_weight must equal 1.0, got {} + {} = {}",
                vector,
                lexical,
                vector + lexical
            )));
        }
        Ok(Self { vector, lexical })
    }

    pub fn vector(&self) -> f64 {
        self.vector
    }

    pub fn lexical(&self) -> f64 {
        self.lexical
    }

    pub fn fuse(&self, vector_similarity: f64, lexical_norm: f64) -> f64 {
        self.vector * vector_similarity + self.lexical * lexical_norm
    }
}

/// Map candidate distances to similarities in `[0, 1]`.
pub fn vector_similarities(metric: Metric, distances: &[f32]) -> Vec<f64> {
    match metric {
        Metric::Cosine => distances
            .iter()
            .map(|&d| (1.0 - d as f64 / 2.0).clamp(0.0, 1.0))
            .collect(),
        Metric::InnerProduct => {
            let min = distances.iter().copied().fold(f32::INFINITY, f32::min) as f64;
            let max = distances.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
            let range = max - min;
            distances
                .iter()
                .map(|&d| {
                    if range <= f64::EPSILON {
                        1.0
                    } else {
                        (max - d as f64) / range
                    }
                })
                .collect()
        }
    }
}

/// Divide every score by the pool maximum.
pub fn normalize_lexical(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|s| (s / max).clamp(0.0, 1.0)).collect()
}

/// One candidate after fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedCandidate {
    /// Position in the instance's chunk order.
    pub position: usize,
    pub vector_score: f64,
    pub lexical_score: f64,
    pub score: f64,
}

/// Total order used for ranking: fused score descending, then vector
/// similarity descending, then insertion position ascending.
pub fn compare(a: &FusedCandidate, b: &FusedCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(b.vector_score.total_cmp(&a.vector_score))
        .then(a.position.cmp(&b.position))
}

/// Fuse aligned component scores into candidates, ranked.
///
/// `positions`, `similarities` and `lexical` must be the same length.
pub fn fuse_and_rank(
    weights: &FusionWeights,
    positions: &[usize],
    similarities: &[f64],
    lexical: &[f64],
) -> Vec<FusedCandidate> {
    let mut fused: Vec<FusedCandidate> = positions
        .iter()
        .zip(similarities)
        .zip(lexical)
        .map(|((&position, &vector_score), &lexical_score)| FusedCandidate {
            position,
            vector_score,
            lexical_score,
            score: weights.fuse(vector_score, lexical_score),
        })
        .collect();
    fused.sort_by(compare);
    fused
}
