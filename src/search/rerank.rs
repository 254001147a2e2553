//! Cross-encoder reranking over HTTP.
//!
//! The scoring service receives the query together with every candidate
//! text and returns one relevance score per candidate. Three response
//! layouts are understood:
//!
//! - `{"results": [{"index": 0, "relevance_score": 0.9}]}` (Cohere)
//! - `{"scores": [0.9, 0.1]}` (parallel array, TEI)
//! - `{"rankings": [{"index": 0, "score": 0.9}]}`

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the reranking service. The pipeline recovers from all of
/// them by keeping the pre-rerank order.
#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Rerank request failed: {0}\nSuggestion: Check that the rerank service is reachable")]
    Http(#[from] reqwest::Error),

    #[error("Rerank service returned status {status}")]
    Status { status: u16 },

    #[error("Unrecognized rerank response: {0}")]
    MalformedResponse(String),

    #[error("Invalid rerank configuration: {0}")]
    Config(String),
}

pub type RerankOutcome<T> = Result<T, RerankError>;

/// Cross-encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Scoring endpoint, conventionally ending in `/rerank`.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Sent as a bearer token when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Candidates sent per request; the tail is dropped.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Results scoring below this are filtered out.
    #[serde(default)]
    pub min_score: f64,
}

fn default_api_url() -> String {
    "http://localhost:8081/rerank".to_string()
}
fn default_model() -> String {
    "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string()
}
fn default_top_k() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            top_k: default_top_k(),
            timeout_secs: default_timeout_secs(),
            min_score: 0.0,
        }
    }
}

impl RerankConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `api_url` with a trailing `/rerank` replaced by `/health`.
    pub fn health_url(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        let base = base.strip_suffix("/rerank").unwrap_or(base);
        format!("{base}/health")
    }
}

/// A document submitted for reranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankCandidate {
    pub id: String,
    pub content: String,
    /// First-stage score.
    pub score: f64,
}

/// A reranked document.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankResult {
    pub id: String,
    /// 1-based position before reranking.
    pub original_rank: usize,
    /// 1-based position after reranking, counted before score filtering.
    pub new_rank: usize,
    pub bi_score: f64,
    pub cross_score: f64,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: Vec<&'a str>,
    model: &'a str,
    top_n: usize,
}

#[derive(Deserialize)]
struct IndexedScore {
    index: usize,
    #[serde(alias = "relevance_score")]
    score: f64,
}

#[derive(Deserialize, Default)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<IndexedScore>,
    #[serde(default)]
    scores: Vec<f64>,
    #[serde(default)]
    rankings: Vec<IndexedScore>,
}

impl RerankResponse {
    /// One score per candidate, unscored candidates at 0.
    fn into_scores(self, count: usize) -> RerankOutcome<Vec<f64>> {
        let mut scores = vec![0.0; count];
        let indexed = if !self.results.is_empty() {
            self.results
        } else if !self.scores.is_empty() {
            for (slot, score) in scores.iter_mut().zip(self.scores) {
                *slot = score;
            }
            return Ok(scores);
        } else if !self.rankings.is_empty() {
            self.rankings
        } else {
            return Err(RerankError::MalformedResponse(
                "expected results, scores or rankings".to_string(),
            ));
        };

        for entry in indexed {
            if let Some(slot) = scores.get_mut(entry.index) {
                *slot = entry.score;
            }
        }
        Ok(scores)
    }
}

/// HTTP client for a cross-encoder scoring service.
#[derive(Debug, Clone)]
pub struct CrossEncoder {
    config: RerankConfig,
    http: Client,
}

impl CrossEncoder {
    pub fn new(config: RerankConfig) -> RerankOutcome<Self> {
        if config.enabled && config.api_url.is_empty() {
            return Err(RerankError::Config("api_url cannot be empty".to_string()));
        }
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RerankError::Config(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Scores `candidates` against `query` and returns them best first.
    ///
    /// A disabled encoder returns the candidates unchanged. Candidates past
    /// `top_k` are dropped before the request is sent.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
    ) -> RerankOutcome<Vec<RerankResult>> {
        if !self.config.enabled {
            return Ok(pass_through(candidates));
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let top_k = if self.config.top_k == 0 {
            default_top_k()
        } else {
            self.config.top_k
        };
        let candidates = &candidates[..candidates.len().min(top_k)];

        let scores = self.score(query, candidates).await?;

        let mut hits: Vec<RerankResult> = candidates
            .iter()
            .zip(scores)
            .enumerate()
            .map(|(i, (c, cross_score))| RerankResult {
                id: c.id.clone(),
                original_rank: i + 1,
                new_rank: 0,
                bi_score: c.score,
                cross_score,
            })
            .collect();
        hits.sort_by(|a, b| b.cross_score.total_cmp(&a.cross_score));
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.new_rank = i + 1;
        }
        hits.retain(|h| h.cross_score >= self.config.min_score);
        Ok(hits)
    }

    async fn score(&self, query: &str, candidates: &[RerankCandidate]) -> RerankOutcome<Vec<f64>> {
        let body = RerankRequest {
            query,
            documents: candidates.iter().map(|c| c.content.as_str()).collect(),
            model: &self.config.model,
            top_n: candidates.len(),
        };

        let mut request = self.http.post(&self.config.api_url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        debug!(
            "Reranking {} candidates via {}",
            candidates.len(),
            self.config.api_url
        );
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RerankError::Status {
                status: response.status().as_u16(),
            });
        }

        let text = response.text().await?;
        let parsed: RerankResponse = serde_json::from_str(&text)
            .map_err(|e| RerankError::MalformedResponse(e.to_string()))?;
        parsed.into_scores(candidates.len())
    }

    /// Probes `GET {base}/health` with a 5 second timeout.
    pub async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self
            .http
            .get(self.config.health_url())
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Rerank health check failed: {e}");
                false
            }
        }
    }
}

fn pass_through(candidates: &[RerankCandidate]) -> Vec<RerankResult> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| RerankResult {
            id: c.id.clone(),
            original_rank: i + 1,
            new_rank: i + 1,
            bi_score: c.score,
            cross_score: c.score,
        })
        .collect()
}
