//! Maximal Marginal Relevance diversification.
//!
//! Greedy reselection: each step takes the candidate maximizing
//! `λ·relevance − (1−λ)·max_sim_to_selected`, where relevance is the fused
//! RRF score and similarity is cosine between node embeddings.

use super::rrf::FusedHit;
use crate::gpu::cosine_similarity;

/// Reorders `candidates` for diversity and keeps at most `limit`.
///
/// `embedding_of` supplies node embeddings; candidates without one are
/// ranked on relevance alone. `lambda >= 1.0` returns the input truncated.
pub fn diversify<F>(candidates: Vec<FusedHit>, limit: usize, lambda: f64, embedding_of: F) -> Vec<FusedHit>
where
    F: Fn(&str) -> Option<Vec<f32>>,
{
    if candidates.len() <= 1 || lambda >= 1.0 {
        let mut candidates = candidates;
        candidates.truncate(limit);
        return candidates;
    }

    let mut remaining: Vec<(FusedHit, Option<Vec<f32>>)> = candidates
        .into_iter()
        .map(|hit| {
            let embedding = embedding_of(&hit.id);
            (hit, embedding)
        })
        .collect();
    let mut selected: Vec<(FusedHit, Option<Vec<f32>>)> = Vec::with_capacity(limit);

    while selected.len() < limit && !remaining.is_empty() {
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;

        for (i, (hit, embedding)) in remaining.iter().enumerate() {
            let redundancy = embedding.as_deref().map_or(0.0, |candidate| {
                selected
                    .iter()
                    .filter_map(|(_, e)| e.as_deref())
                    .filter(|e| e.len() == candidate.len())
                    .map(|e| f64::from(cosine_similarity(candidate, e)))
                    .fold(0.0, f64::max)
            });
            let score = lambda * hit.rrf_score - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best = i;
            }
        }

        selected.push(remaining.remove(best));
    }

    selected.into_iter().map(|(hit, _)| hit).collect()
}
