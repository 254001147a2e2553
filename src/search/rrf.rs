//! Reciprocal Rank Fusion.
//!
//! `score(d) = Σ w_source / (k + rank_source(d))` with 1-based ranks. A
//! document missing from a source contributes nothing for it. Ranks are
//! fused without looking at the sources' raw scores, so cosine similarities
//! and BM25 scores never need a common scale.

use std::collections::HashMap;

use super::bm25::ScoredId;

/// Weights and cut-offs for fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfParams {
    pub k: f64,
    pub vector_weight: f64,
    pub bm25_weight: f64,
    /// Fused scores below this are dropped.
    pub min_score: f64,
}

impl Default for RrfParams {
    fn default() -> Self {
        Self {
            k: 60.0,
            vector_weight: 1.0,
            bm25_weight: 1.0,
            min_score: 0.0,
        }
    }
}

/// A fused candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub rrf_score: f64,
    pub vector_rank: Option<usize>,
    pub bm25_rank: Option<usize>,
    /// Vector similarity when present, the BM25 score otherwise.
    pub original_score: f64,
}

/// Fuses two ranked lists.
///
/// Output is sorted by descending fused score. Equal scores keep the order
/// in which ids were first seen, vector list first.
pub fn fuse(vector: &[ScoredId], bm25: &[ScoredId], params: &RrfParams) -> Vec<FusedHit> {
    let k = if params.k > 0.0 { params.k } else { 60.0 };
    let mut order: Vec<FusedHit> = Vec::with_capacity(vector.len() + bm25.len());
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for (i, hit) in vector.iter().enumerate() {
        if seen.contains_key(hit.id.as_str()) {
            continue;
        }
        seen.insert(&hit.id, order.len());
        order.push(FusedHit {
            id: hit.id.clone(),
            rrf_score: params.vector_weight / (k + (i + 1) as f64),
            vector_rank: Some(i + 1),
            bm25_rank: None,
            original_score: hit.score,
        });
    }

    for (i, hit) in bm25.iter().enumerate() {
        let contribution = params.bm25_weight / (k + (i + 1) as f64);
        match seen.get(hit.id.as_str()) {
            Some(&slot) => {
                let fused = &mut order[slot];
                if fused.bm25_rank.is_none() {
                    fused.rrf_score += contribution;
                    fused.bm25_rank = Some(i + 1);
                }
            }
            None => {
                seen.insert(&hit.id, order.len());
                order.push(FusedHit {
                    id: hit.id.clone(),
                    rrf_score: contribution,
                    vector_rank: None,
                    bm25_rank: Some(i + 1),
                    original_score: hit.score,
                });
            }
        }
    }

    order.retain(|h| h.rrf_score >= params.min_score);
    order.sort_by(|a, b| b.rrf_score.total_cmp(&a.rrf_score));
    order
}
