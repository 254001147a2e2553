//! Hybrid retrieval: vector + BM25 fusion, MMR and cross-encoder stages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::bm25::{Bm25Source, ScoredId};
use super::mmr;
use super::rerank::{CrossEncoder, RerankCandidate};
use super::rrf::{self, FusedHit, RrfParams};
use super::store::{Node, NodeStore};
use super::types::{
    Retrieval, SearchHit, SearchMethod, SearchMetrics, SearchOptions, SearchOutcome,
    SearchResponse,
};
use crate::vector::ClusterIndex;

/// Hybrid search over a cluster index, a full-text source and a node store.
///
/// Strategy, first non-empty answer wins:
/// 1. RRF fusion of vector and BM25 candidates (needs a query embedding)
/// 2. Vector similarity only
/// 3. BM25 only
///
/// Vector errors such as a dimension mismatch are returned to the caller.
/// BM25 and cross-encoder failures only downgrade the method.
pub struct HybridSearch {
    index: Arc<ClusterIndex>,
    bm25: Arc<dyn Bm25Source>,
    store: Arc<dyn NodeStore>,
    cross_encoder: Option<CrossEncoder>,
}

impl HybridSearch {
    pub fn new(
        index: Arc<ClusterIndex>,
        bm25: Arc<dyn Bm25Source>,
        store: Arc<dyn NodeStore>,
    ) -> Self {
        Self {
            index,
            bm25,
            store,
            cross_encoder: None,
        }
    }

    pub fn with_cross_encoder(mut self, cross_encoder: CrossEncoder) -> Self {
        self.cross_encoder = Some(cross_encoder);
        self
    }

    pub fn set_cross_encoder(&mut self, cross_encoder: Option<CrossEncoder>) {
        self.cross_encoder = cross_encoder;
    }

    pub fn index(&self) -> &Arc<ClusterIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// True when a cross-encoder is configured, enabled and healthy.
    pub async fn cross_encoder_available(&self) -> bool {
        match &self.cross_encoder {
            Some(encoder) => encoder.is_available().await,
            None => false,
        }
    }

    /// Runs the search.
    ///
    /// # Arguments
    /// * `query` - Free text for the BM25 stage and the cross-encoder
    /// * `embedding` - Query vector; `None` or empty goes straight to BM25
    /// * `opts` - Limits, fusion weights and optional stages
    ///
    /// # Returns
    /// A response tagged with the method that produced it.
    pub async fn search(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
        opts: &SearchOptions,
    ) -> SearchOutcome<SearchResponse> {
        let started = Instant::now();

        let Some(embedding) = embedding.filter(|e| !e.is_empty()) else {
            debug!("No query embedding, using full-text search");
            return Ok(self.fulltext_only(query, opts, started));
        };

        let response = self.rrf_hybrid(query, embedding, opts, started).await?;
        if !response.results.is_empty() {
            return Ok(response);
        }

        let mut response = self.vector_only(query, embedding, opts, started)?;
        if !response.results.is_empty() {
            info!("RRF returned nothing for '{query}', fell back to vector search");
            response.fallback_triggered = true;
            response.message =
                Some("RRF search returned no results, fell back to vector search".to_string());
            return Ok(response);
        }

        debug!("Vector search returned nothing for '{query}', using full-text search");
        Ok(self.fulltext_only(query, opts, started))
    }

    async fn rrf_hybrid(
        &self,
        query: &str,
        embedding: &[f32],
        opts: &SearchOptions,
        started: Instant,
    ) -> SearchOutcome<SearchResponse> {
        let mut metrics = SearchMetrics::default();

        let stage = Instant::now();
        let vector = self.vector_candidates(embedding, opts)?;
        metrics.vector_search_time_ms = elapsed_ms(stage);

        let stage = Instant::now();
        let bm25 = self.bm25_candidates(query, opts);
        metrics.bm25_search_time_ms = elapsed_ms(stage);

        let (vector, bm25) = if opts.types.is_empty() {
            (vector, bm25)
        } else {
            (
                self.filter_by_type(vector, &opts.types),
                self.filter_by_type(bm25, &opts.types),
            )
        };
        metrics.vector_candidates = vector.len();
        metrics.bm25_candidates = bm25.len();

        let stage = Instant::now();
        let params = RrfParams {
            k: opts.rrf_k,
            vector_weight: opts.vector_weight,
            bm25_weight: opts.bm25_weight,
            min_score: opts.min_rrf_score,
        };
        let mut fused = rrf::fuse(&vector, &bm25, &params);
        metrics.fused_candidates = fused.len();

        let mut method = SearchMethod::new(Retrieval::RrfHybrid);
        let mut message = "Reciprocal Rank Fusion (Vector + BM25)".to_string();

        if opts.mmr_enabled {
            fused = mmr::diversify(fused, opts.limit, opts.mmr_lambda, |id| {
                self.store
                    .get_embedding(id)
                    .or_else(|| self.index.get(id))
            });
            method.mmr = true;
            message = format!("RRF + MMR diversification (λ={:.2})", opts.mmr_lambda);
        }
        metrics.fusion_time_ms = elapsed_ms(stage);

        if opts.rerank_enabled {
            let stage = Instant::now();
            let (reranked, applied) = self.rerank(query, fused, opts).await;
            fused = reranked;
            metrics.rerank_time_ms = elapsed_ms(stage);
            if applied {
                method.rerank = true;
                message.push_str(" + Cross-Encoder Reranking");
            } else {
                message.push_str(" (reranking skipped)");
            }
        }

        let total_candidates = fused.len();
        let results = self.enrich_fused(&fused, opts.limit);
        metrics.total_time_ms = elapsed_ms(started);

        debug!(
            "{method}: {} vector, {} bm25, {} fused, {} returned",
            metrics.vector_candidates,
            metrics.bm25_candidates,
            metrics.fused_candidates,
            results.len()
        );

        Ok(SearchResponse {
            status: "success".to_string(),
            query: query.to_string(),
            returned: results.len(),
            results,
            total_candidates,
            search_method: method.to_string(),
            fallback_triggered: false,
            message: Some(message),
            metrics: Some(metrics),
        })
    }

    fn vector_only(
        &self,
        query: &str,
        embedding: &[f32],
        opts: &SearchOptions,
        started: Instant,
    ) -> SearchOutcome<SearchResponse> {
        let stage = Instant::now();
        let mut hits = self.vector_candidates(embedding, opts)?;
        let vector_search_time_ms = elapsed_ms(stage);
        if !opts.types.is_empty() {
            hits = self.filter_by_type(hits, &opts.types);
        }

        let results = self.enrich_ranked(&hits, opts.limit, Retrieval::Vector);
        Ok(SearchResponse {
            status: "success".to_string(),
            query: query.to_string(),
            returned: results.len(),
            results,
            total_candidates: hits.len(),
            search_method: SearchMethod::new(Retrieval::Vector).to_string(),
            fallback_triggered: false,
            message: Some("Vector similarity search (cosine)".to_string()),
            metrics: Some(SearchMetrics {
                vector_search_time_ms,
                vector_candidates: hits.len(),
                total_time_ms: elapsed_ms(started),
                ..SearchMetrics::default()
            }),
        })
    }

    fn fulltext_only(&self, query: &str, opts: &SearchOptions, started: Instant) -> SearchResponse {
        let stage = Instant::now();
        let mut hits = self.bm25_candidates(query, opts);
        let bm25_search_time_ms = elapsed_ms(stage);
        if !opts.types.is_empty() {
            hits = self.filter_by_type(hits, &opts.types);
        }

        let results = self.enrich_ranked(&hits, opts.limit, Retrieval::Fulltext);
        SearchResponse {
            status: "success".to_string(),
            query: query.to_string(),
            returned: results.len(),
            results,
            total_candidates: hits.len(),
            search_method: SearchMethod::new(Retrieval::Fulltext).to_string(),
            fallback_triggered: true,
            message: Some(
                "Full-text BM25 search (vector search unavailable or returned no results)"
                    .to_string(),
            ),
            metrics: Some(SearchMetrics {
                bm25_search_time_ms,
                bm25_candidates: hits.len(),
                total_time_ms: elapsed_ms(started),
                ..SearchMetrics::default()
            }),
        }
    }

    fn vector_candidates(
        &self,
        embedding: &[f32],
        opts: &SearchOptions,
    ) -> SearchOutcome<Vec<ScoredId>> {
        let hits =
            self.index
                .search_with_clusters(embedding, opts.candidate_limit(), opts.probe_clusters)?;
        Ok(hits
            .into_iter()
            .filter(|h| h.score >= opts.min_similarity)
            .map(|h| ScoredId::new(h.id, f64::from(h.score)))
            .collect())
    }

    fn bm25_candidates(&self, query: &str, opts: &SearchOptions) -> Vec<ScoredId> {
        match self.bm25.search(query, opts.candidate_limit()) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("BM25 search failed, continuing without keyword candidates: {e}");
                Vec::new()
            }
        }
    }

    fn filter_by_type(&self, hits: Vec<ScoredId>, types: &[String]) -> Vec<ScoredId> {
        hits.into_iter()
            .filter(|h| {
                self.store
                    .get_node(&h.id)
                    .is_some_and(|node| node.has_type(types))
            })
            .collect()
    }

    /// Returns the reranked list and whether the cross-encoder was applied.
    async fn rerank(
        &self,
        query: &str,
        fused: Vec<FusedHit>,
        opts: &SearchOptions,
    ) -> (Vec<FusedHit>, bool) {
        let Some(encoder) = self.cross_encoder.as_ref().filter(|e| e.is_enabled()) else {
            debug!("Reranking requested but no cross-encoder is enabled");
            return (fused, false);
        };
        if fused.is_empty() {
            return (fused, false);
        }

        let top_k = if opts.rerank_top_k == 0 {
            fused.len()
        } else {
            opts.rerank_top_k
        };
        let candidates: Vec<RerankCandidate> = fused
            .iter()
            .take(top_k)
            .filter_map(|hit| {
                let content = self.store.get_node(&hit.id)?.searchable_text();
                (!content.is_empty()).then(|| RerankCandidate {
                    id: hit.id.clone(),
                    content,
                    score: hit.rrf_score,
                })
            })
            .collect();
        if candidates.is_empty() {
            return (fused, false);
        }

        let reranked = match encoder.rerank(query, &candidates).await {
            Ok(reranked) => reranked,
            Err(e) => {
                warn!("Cross-encoder rerank failed, keeping RRF order: {e}");
                return (fused, false);
            }
        };

        let by_id: HashMap<&str, &FusedHit> = fused.iter().map(|h| (h.id.as_str(), h)).collect();
        let hits = reranked
            .into_iter()
            .filter(|r| r.cross_score >= opts.rerank_min_score)
            .filter_map(|r| {
                let original = by_id.get(r.id.as_str())?;
                Some(FusedHit {
                    id: r.id,
                    rrf_score: r.cross_score,
                    vector_rank: original.vector_rank,
                    bm25_rank: original.bm25_rank,
                    original_score: original.original_score,
                })
            })
            .collect();
        (hits, true)
    }

    fn enrich_fused(&self, fused: &[FusedHit], limit: usize) -> Vec<SearchHit> {
        fused
            .iter()
            .filter_map(|hit| {
                let node = self.store.get_node(&hit.id)?;
                Some(SearchHit {
                    score: hit.rrf_score,
                    similarity: hit.original_score,
                    rrf_score: hit.rrf_score,
                    vector_rank: hit.vector_rank,
                    bm25_rank: hit.bm25_rank,
                    ..describe(node)
                })
            })
            .take(limit)
            .collect()
    }

    fn enrich_ranked(&self, hits: &[ScoredId], limit: usize, source: Retrieval) -> Vec<SearchHit> {
        hits.iter()
            .enumerate()
            .filter_map(|(i, hit)| {
                let node = self.store.get_node(&hit.id)?;
                let rank = Some(i + 1);
                Some(SearchHit {
                    score: hit.score,
                    similarity: hit.score,
                    vector_rank: if source == Retrieval::Vector { rank } else { None },
                    bm25_rank: if source == Retrieval::Fulltext { rank } else { None },
                    ..describe(node)
                })
            })
            .take(limit)
            .collect()
    }
}

/// Display fields of a node, scores zeroed.
fn describe(node: Node) -> SearchHit {
    SearchHit {
        node_type: node.text_property("type").map(str::to_string),
        title: node.text_property("title").map(str::to_string),
        description: node.text_property("description").map(str::to_string),
        content_preview: node.content_preview(),
        labels: node.labels,
        id: node.id,
        score: 0.0,
        similarity: 0.0,
        rrf_score: 0.0,
        vector_rank: None,
        bm25_rank: None,
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
