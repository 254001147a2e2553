//! Request, response and error types for hybrid search.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vector::VectorError;

/// Knobs for one hybrid search call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum results returned. Each source contributes `2 * limit`
    /// candidates to fusion.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Vector hits below this cosine similarity are dropped before fusion.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Keep only nodes carrying one of these labels (or `type` property).
    #[serde(default)]
    pub types: Vec<String>,

    /// RRF smoothing constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    #[serde(default = "default_weight")]
    pub vector_weight: f64,

    #[serde(default = "default_weight")]
    pub bm25_weight: f64,

    /// Fused documents scoring below this are discarded.
    #[serde(default = "default_min_rrf_score")]
    pub min_rrf_score: f64,

    #[serde(default)]
    pub mmr_enabled: bool,

    /// 1.0 is pure relevance, 0.0 pure diversity.
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,

    #[serde(default)]
    pub rerank_enabled: bool,

    /// Candidates sent to the cross-encoder.
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,

    #[serde(default)]
    pub rerank_min_score: f64,

    /// Clusters probed by the vector stage once the index is clustered.
    #[serde(default = "default_probe_clusters")]
    pub probe_clusters: usize,
}

fn default_limit() -> usize {
    50
}
fn default_min_similarity() -> f32 {
    0.5
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_weight() -> f64 {
    1.0
}
fn default_min_rrf_score() -> f64 {
    0.01
}
fn default_mmr_lambda() -> f64 {
    0.7
}
fn default_rerank_top_k() -> usize {
    100
}
fn default_probe_clusters() -> usize {
    3
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            min_similarity: default_min_similarity(),
            types: Vec::new(),
            rrf_k: default_rrf_k(),
            vector_weight: default_weight(),
            bm25_weight: default_weight(),
            min_rrf_score: default_min_rrf_score(),
            mmr_enabled: false,
            mmr_lambda: default_mmr_lambda(),
            rerank_enabled: false,
            rerank_top_k: default_rerank_top_k(),
            rerank_min_score: 0.0,
            probe_clusters: default_probe_clusters(),
        }
    }
}

impl SearchOptions {
    /// Candidates pulled from each source before fusion.
    pub fn candidate_limit(&self) -> usize {
        self.limit.saturating_mul(2)
    }

    /// Reweights the two sources by query length.
    ///
    /// Short keyword queries (two words or fewer) lean on BM25, long natural
    /// language queries (six or more) on the vector side.
    pub fn adapt_to_query(mut self, query: &str) -> Self {
        let (vector, bm25) = adaptive_weights(query);
        self.vector_weight = vector;
        self.bm25_weight = bm25;
        self
    }
}

/// `(vector_weight, bm25_weight)` for a query.
pub fn adaptive_weights(query: &str) -> (f64, f64) {
    match query.split_whitespace().count() {
        0..=2 => (0.5, 1.5),
        3..=5 => (1.0, 1.0),
        _ => (1.5, 0.5),
    }
}

/// One enriched hit returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,

    /// Final ranking score (RRF, or cross-encoder after reranking).
    pub score: f64,
    /// Score from the source that first produced the hit.
    #[serde(default)]
    pub similarity: f64,

    #[serde(default)]
    pub rrf_score: f64,
    /// 1-based rank in the vector list, absent when not retrieved there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bm25_rank: Option<usize>,
}

/// Per-stage timings and candidate counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub vector_search_time_ms: u64,
    pub bm25_search_time_ms: u64,
    pub fusion_time_ms: u64,
    pub rerank_time_ms: u64,
    pub total_time_ms: u64,
    pub vector_candidates: usize,
    pub bm25_candidates: usize,
    pub fused_candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: String,
    pub query: String,
    pub results: Vec<SearchHit>,
    pub total_candidates: usize,
    pub returned: usize,
    /// Stages that produced the ranking, e.g. `rrf_hybrid+mmr+rerank`.
    pub search_method: String,
    pub fallback_triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SearchMetrics>,
}

/// Base retrieval strategy of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    RrfHybrid,
    Vector,
    Fulltext,
}

/// Method tag reported in [`SearchResponse::search_method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMethod {
    pub retrieval: Retrieval,
    pub mmr: bool,
    pub rerank: bool,
}

impl SearchMethod {
    pub fn new(retrieval: Retrieval) -> Self {
        Self {
            retrieval,
            mmr: false,
            rerank: false,
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.retrieval {
            Retrieval::RrfHybrid => "rrf_hybrid",
            Retrieval::Vector => "vector",
            Retrieval::Fulltext => "fulltext",
        };
        write!(f, "{base}")?;
        if self.mmr {
            write!(f, "+mmr")?;
        }
        if self.rerank {
            write!(f, "+rerank")?;
        }
        Ok(())
    }
}

/// Errors surfaced by the search layer.
///
/// BM25 and cross-encoder failures never reach callers of the hybrid
/// pipeline; they downgrade the method instead.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error("Full-text index error: {0}\nSuggestion: Rebuild the full-text index")]
    FullText(String),

    #[error("Vector index '{name}' does not exist\nSuggestion: Create the index before querying it")]
    IndexNotFound { name: String },

    #[error("Query parameter '${name}' is not bound\nSuggestion: Pass the parameter with the query")]
    UnboundParameter { name: String },

    #[error("Query parameter '${name}' must be a list of numbers or a string")]
    InvalidParameter { name: String },

    #[error(
        "Text query needs an embedder but none is configured\nSuggestion: Pass a vector or enable auto-embedding"
    )]
    NoEmbedder,

    #[error("Embedding failed: {0}")]
    Embedding(String),
}

pub type SearchOutcome<T> = Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = SearchOptions::default();
        assert_eq!(opts.limit, 50);
        assert_eq!(opts.candidate_limit(), 100);
        assert!((opts.rrf_k - 60.0).abs() < f64::EPSILON);
        assert!((opts.min_rrf_score - 0.01).abs() < f64::EPSILON);
        assert!(!opts.mmr_enabled);
        assert!((opts.mmr_lambda - 0.7).abs() < f64::EPSILON);
        assert!(!opts.rerank_enabled);
        assert_eq!(opts.rerank_top_k, 100);
    }

    #[test]
    fn test_adaptive_weights() {
        assert_eq!(adaptive_weights("python"), (0.5, 1.5));
        assert_eq!(adaptive_weights("graph database"), (0.5, 1.5));
        assert_eq!(adaptive_weights("machine learning algorithms"), (1.0, 1.0));
        assert_eq!(
            adaptive_weights("how do I scale a graph database cluster"),
            (1.5, 0.5)
        );

        let opts = SearchOptions::default().adapt_to_query("rust");
        assert!((opts.bm25_weight - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_search_method_tags() {
        let mut method = SearchMethod::new(Retrieval::RrfHybrid);
        assert_eq!(method.to_string(), "rrf_hybrid");
        method.rerank = true;
        assert_eq!(method.to_string(), "rrf_hybrid+rerank");
        method.mmr = true;
        assert_eq!(method.to_string(), "rrf_hybrid+mmr+rerank");
        assert_eq!(SearchMethod::new(Retrieval::Fulltext).to_string(), "fulltext");
    }

    #[test]
    fn test_options_deserialize_partial() {
        let opts: SearchOptions = serde_json::from_str(r#"{"limit": 5, "mmr_enabled": true}"#).unwrap();
        assert_eq!(opts.limit, 5);
        assert!(opts.mmr_enabled);
        assert_eq!(opts.rerank_top_k, 100);
    }
}
