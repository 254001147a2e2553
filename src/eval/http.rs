//! Evaluates a running server through its HTTP search endpoint.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::harness::{EvalError, EvalOutcome, SearchReply, Searcher, TestCase};
use crate::search::SearchOptions;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct NodeRef {
    id: String,
}

#[derive(Deserialize)]
struct Row {
    node: NodeRef,
}

/// POSTs queries to `{base_url}/nornicdb/search`.
///
/// The endpoint answers with `[{"node": {"id": ...}, "score": ...}]`.
#[derive(Debug, Clone)]
pub struct HttpSearcher {
    base_url: String,
    http: Client,
}

impl HttpSearcher {
    pub fn new(base_url: impl Into<String>) -> EvalOutcome<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base_url}/health` must answer 2xx within 5 seconds.
    pub async fn check_health(&self) -> EvalOutcome<()> {
        let url = format!("{}/health", self.base_url);
        let unreachable = |reason: String| EvalError::Unreachable {
            url: self.base_url.clone(),
            reason,
        };
        let response = self
            .http
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(unreachable(format!("status {}", response.status())))
        }
    }
}

impl Searcher for HttpSearcher {
    async fn search(&self, case: &TestCase, options: &SearchOptions) -> EvalOutcome<SearchReply> {
        let url = format!("{}/nornicdb/search", self.base_url);
        debug!("POST {url} '{}'", case.query);
        let rows: Vec<Row> = self
            .http
            .post(&url)
            .json(&SearchRequest {
                query: &case.query,
                limit: options.limit,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(SearchReply {
            ids: rows.into_iter().map(|row| row.node.id).collect(),
            method: "http".to_string(),
        })
    }
}

/// Built-in cases for a server seeded with the sample memory graph.
pub fn demo_test_cases() -> Vec<TestCase> {
    let mut semantic = TestCase::new(
        "Semantic - AI Systems",
        "artificial intelligence systems that learn",
        &["ml-intro", "ml-neural"],
    );
    semantic.relevance_grades = Some(
        [("ml-intro".to_string(), 3), ("ml-neural".to_string(), 2)]
            .into_iter()
            .collect(),
    );
    semantic.tags = vec!["semantic".to_string()];

    let tagged = |mut case: TestCase, tag: &str| {
        case.tags = vec![tag.to_string()];
        case
    };

    vec![
        tagged(
            TestCase::new(
                "ML Concept Search",
                "machine learning neural networks",
                &["ml-intro", "ml-neural"],
            ),
            "concepts",
        ),
        tagged(
            TestCase::new(
                "Database Decision",
                "database architecture postgresql",
                &["db-design"],
            ),
            "decisions",
        ),
        tagged(
            TestCase::new("Code Search", "authentication JWT middleware", &["code-auth"]),
            "code",
        ),
        tagged(
            TestCase::new("Task Search", "API implementation pending", &["task-api"]),
            "tasks",
        ),
        semantic,
    ]
}
