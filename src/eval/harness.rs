//! Runs test cases against a searcher and grades the rankings.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::metrics::Metrics;
use crate::search::{HybridSearch, SearchError, SearchOptions};

/// Eval harness errors. A failing search is not one of them; it is recorded
/// on the test result and counts as a failed test.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {source}\nSuggestion: Check the JSON against the test suite format")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("No test cases defined\nSuggestion: Pass --suite or add test cases to the corpus file")]
    NoTestCases,

    #[error("Invalid threshold '{input}'\nSuggestion: Use key=value pairs such as p10=0.5,mrr=0.5,hit=0.8")]
    InvalidThreshold { input: String },

    #[error("Search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server not reachable at '{url}': {reason}")]
    Unreachable { url: String, reason: String },

    #[error(transparent)]
    Search(#[from] SearchError),
}

pub type EvalOutcome<T> = Result<T, EvalError>;

/// One query with its relevant ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub query: String,

    /// Precomputed query embedding. Without one the search is text only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Relevant ids, most relevant first.
    #[serde(default)]
    pub expected: Vec<String>,

    /// Graded relevance (0 to 3). Absent means binary relevance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_grades: Option<HashMap<String, u32>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Per-case search options. Harness defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SearchOptions>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, query: impl Into<String>, expected: &[&str]) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

/// A named collection of test cases, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn load(path: &Path) -> EvalOutcome<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| EvalError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| EvalError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Minimum acceptable metric values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(rename = "precision@10", default = "default_precision_10")]
    pub precision_10: f64,
    #[serde(rename = "recall@10", default = "default_recall_10")]
    pub recall_10: f64,
    #[serde(default = "default_mrr")]
    pub mrr: f64,
    #[serde(rename = "ndcg@10", default = "default_ndcg_10")]
    pub ndcg_10: f64,
    #[serde(default = "default_hit_rate")]
    pub hit_rate: f64,
}

fn default_precision_10() -> f64 {
    0.5
}
fn default_recall_10() -> f64 {
    0.3
}
fn default_mrr() -> f64 {
    0.5
}
fn default_ndcg_10() -> f64 {
    0.5
}
fn default_hit_rate() -> f64 {
    0.8
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            precision_10: default_precision_10(),
            recall_10: default_recall_10(),
            mrr: default_mrr(),
            ndcg_10: default_ndcg_10(),
            hit_rate: default_hit_rate(),
        }
    }
}

impl Thresholds {
    /// Applies overrides such as `p10=0.5,mrr=0.5,hit=0.8` on top of `self`.
    ///
    /// Keys: `p10`/`precision10`, `r10`/`recall10`, `mrr`, `ndcg`/`ndcg10`,
    /// `hit`/`hitrate`.
    pub fn with_overrides(mut self, input: &str) -> EvalOutcome<Self> {
        for pair in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let invalid = || EvalError::InvalidThreshold {
                input: pair.to_string(),
            };
            let (key, value) = pair.split_once('=').ok_or_else(invalid)?;
            let value: f64 = value.trim().parse().map_err(|_| invalid())?;
            match key.trim().to_ascii_lowercase().as_str() {
                "p10" | "precision10" => self.precision_10 = value,
                "r10" | "recall10" => self.recall_10 = value,
                "mrr" => self.mrr = value,
                "ndcg" | "ndcg10" => self.ndcg_10 = value,
                "hit" | "hitrate" => self.hit_rate = value,
                _ => return Err(invalid()),
            }
        }
        Ok(self)
    }

    /// Per-test pass rule: P@10, MRR and hit rate must all meet their
    /// thresholds.
    pub fn passes(&self, metrics: &Metrics) -> bool {
        metrics.precision_10 >= self.precision_10
            && metrics.mrr >= self.mrr
            && metrics.hit_rate >= self.hit_rate
    }
}

/// Outcome of one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case: TestCase,
    pub metrics: Metrics,
    pub returned: Vec<String>,
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub search_method: String,
    pub passed: bool,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub suite_name: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
    /// Mean over tests that did not error.
    pub aggregate: Metrics,
    pub results: Vec<TestResult>,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub thresholds: Thresholds,
}

impl EvalResult {
    pub fn all_passed(&self) -> bool {
        self.failed_tests == 0
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.passed_tests as f64 / self.total_tests as f64
        }
    }
}

/// Ranked ids returned by a searcher, with the method that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReply {
    pub ids: Vec<String>,
    pub method: String,
}

/// Anything that can answer a test query.
pub trait Searcher {
    fn search(
        &self,
        case: &TestCase,
        options: &SearchOptions,
    ) -> impl Future<Output = EvalOutcome<SearchReply>> + Send;
}

impl Searcher for HybridSearch {
    async fn search(&self, case: &TestCase, options: &SearchOptions) -> EvalOutcome<SearchReply> {
        let response =
            HybridSearch::search(self, &case.query, case.embedding.as_deref(), options).await?;
        Ok(SearchReply {
            ids: response.results.into_iter().map(|hit| hit.id).collect(),
            method: response.search_method,
        })
    }
}

/// Runs test cases against a [`Searcher`].
pub struct Harness<S> {
    searcher: S,
    suite_name: String,
    test_cases: Vec<TestCase>,
    thresholds: Thresholds,
    options: SearchOptions,
    adaptive_rrf: bool,
}

impl<S: Searcher> Harness<S> {
    /// Harness with default thresholds. Cases without their own options
    /// search with `limit = 50` so recall@50 is meaningful.
    pub fn new(searcher: S) -> Self {
        Self {
            searcher,
            suite_name: "default".to_string(),
            test_cases: Vec::new(),
            thresholds: Thresholds::default(),
            options: SearchOptions {
                limit: 50,
                ..SearchOptions::default()
            },
            adaptive_rrf: false,
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    /// Adapt the harness options' RRF weights to each query. Cases that
    /// carry their own options are searched with them unchanged.
    pub fn with_adaptive_rrf(mut self, enabled: bool) -> Self {
        self.adaptive_rrf = enabled;
        self
    }

    pub fn with_suite_name(mut self, name: impl Into<String>) -> Self {
        self.suite_name = name.into();
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn searcher(&self) -> &S {
        &self.searcher
    }

    pub fn add_test_case(&mut self, case: TestCase) {
        self.test_cases.push(case);
    }

    pub fn add_test_cases(&mut self, cases: impl IntoIterator<Item = TestCase>) {
        self.test_cases.extend(cases);
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    /// Appends the cases of the suite at `path`, adopting its name when set.
    pub fn load_suite(&mut self, path: &Path) -> EvalOutcome<()> {
        let suite = TestSuite::load(path)?;
        debug!(
            "Loaded {} test cases from {}",
            suite.test_cases.len(),
            path.display()
        );
        if !suite.name.is_empty() {
            self.suite_name = suite.name;
        }
        self.test_cases.extend(suite.test_cases);
        Ok(())
    }

    /// Runs every case in order.
    ///
    /// # Errors
    /// `NoTestCases` when nothing was added. Search failures are recorded
    /// per test.
    pub async fn run(&self) -> EvalOutcome<EvalResult> {
        self.run_with_progress(|_| {}).await
    }

    /// [`Self::run`], calling `on_case` after each finished case.
    pub async fn run_with_progress<F>(&self, mut on_case: F) -> EvalOutcome<EvalResult>
    where
        F: FnMut(&TestResult),
    {
        if self.test_cases.is_empty() {
            return Err(EvalError::NoTestCases);
        }

        let timestamp = Utc::now();
        let started = Instant::now();
        let mut results = Vec::with_capacity(self.test_cases.len());
        for case in &self.test_cases {
            let result = self.run_case(case).await;
            on_case(&result);
            results.push(result);
        }

        let aggregate = Metrics::mean(
            results
                .iter()
                .filter(|r| r.error.is_none())
                .map(|r| &r.metrics),
        );
        let passed_tests = results.iter().filter(|r| r.passed).count();

        Ok(EvalResult {
            suite_name: self.suite_name.clone(),
            timestamp,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            aggregate,
            total_tests: results.len(),
            passed_tests,
            failed_tests: results.len() - passed_tests,
            results,
            thresholds: self.thresholds,
        })
    }

    async fn run_case(&self, case: &TestCase) -> TestResult {
        let started = Instant::now();
        let adapted;
        let options = match &case.options {
            Some(options) => options,
            None if self.adaptive_rrf => {
                adapted = self.options.clone().adapt_to_query(&case.query);
                &adapted
            }
            None => &self.options,
        };

        match self.searcher.search(case, options).await {
            Ok(reply) => {
                let metrics =
                    Metrics::compute(&reply.ids, &case.expected, case.relevance_grades.as_ref());
                let passed = self.thresholds.passes(&metrics);
                debug!(
                    "{}: {} results via {}, mrr {:.3}",
                    case.name,
                    reply.ids.len(),
                    reply.method,
                    metrics.mrr
                );
                TestResult {
                    test_case: case.clone(),
                    metrics,
                    returned: reply.ids,
                    duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                    error: None,
                    search_method: reply.method,
                    passed,
                }
            }
            Err(e) => {
                warn!("Test '{}' failed to search: {e}", case.name);
                TestResult {
                    test_case: case.clone(),
                    metrics: Metrics::default(),
                    returned: Vec::new(),
                    duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                    error: Some(e.to_string()),
                    search_method: String::new(),
                    passed: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers from a fixed table keyed by query.
    struct TableSearcher(HashMap<String, Vec<String>>);

    impl TableSearcher {
        fn new(rows: &[(&str, &[&str])]) -> Self {
            Self(
                rows.iter()
                    .map(|(q, ids)| (q.to_string(), ids.iter().map(|s| s.to_string()).collect()))
                    .collect(),
            )
        }
    }

    impl Searcher for TableSearcher {
        async fn search(&self, case: &TestCase, _options: &SearchOptions) -> EvalOutcome<SearchReply> {
            match self.0.get(&case.query) {
                Some(ids) => Ok(SearchReply {
                    ids: ids.clone(),
                    method: "table".to_string(),
                }),
                None => Err(EvalError::Unreachable {
                    url: "table".to_string(),
                    reason: format!("no row for {}", case.query),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_run_counts_and_aggregate() {
        let searcher = TableSearcher::new(&[("good", &["a", "b"]), ("bad", &["x", "y"])]);
        let mut harness = Harness::new(searcher).with_thresholds(Thresholds {
            precision_10: 0.1,
            ..Thresholds::default()
        });
        harness.add_test_case(TestCase::new("good", "good", &["a"]));
        harness.add_test_case(TestCase::new("bad", "bad", &["a"]));

        let result = harness.run().await.unwrap();
        assert_eq!(result.total_tests, 2);
        assert_eq!(result.passed_tests, 1);
        assert_eq!(result.failed_tests, 1);
        assert!(!result.all_passed());
        assert!((result.aggregate.mrr - 0.5).abs() < 1e-9);
        assert_eq!(result.results[0].search_method, "table");
    }

    /// Records the options each query was searched with.
    #[derive(Default)]
    struct RecordingSearcher(parking_lot::Mutex<Vec<(String, SearchOptions)>>);

    impl Searcher for RecordingSearcher {
        async fn search(&self, case: &TestCase, options: &SearchOptions) -> EvalOutcome<SearchReply> {
            self.0.lock().push((case.query.clone(), options.clone()));
            Ok(SearchReply {
                ids: case.expected.clone(),
                method: "recording".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_adaptive_rrf_keeps_harness_options() {
        let options = SearchOptions {
            limit: 20,
            rerank_enabled: true,
            ..SearchOptions::default()
        };
        let mut harness = Harness::new(RecordingSearcher::default())
            .with_options(options.clone())
            .with_adaptive_rrf(true);
        let mut pinned = TestCase::new("pinned", "jwt", &["a"]);
        pinned.options = Some(SearchOptions::default());
        harness.add_test_cases([
            TestCase::new("short", "jwt", &["a"]),
            TestCase::new("long", "how do tokens get refreshed after expiry", &["a"]),
            pinned,
        ]);

        harness.run().await.unwrap();
        let seen = harness.searcher().0.lock().clone();
        assert_eq!(seen.len(), 3);

        let (_, short) = &seen[0];
        assert!(short.rerank_enabled);
        assert_eq!(short.limit, 20);
        assert_eq!(short.vector_weight, 0.5);
        assert_eq!(short.bm25_weight, 1.5);

        let (_, long) = &seen[1];
        assert!(long.rerank_enabled);
        assert_eq!(long.vector_weight, 1.5);
        assert_eq!(long.bm25_weight, 0.5);

        let (_, own) = &seen[2];
        assert!(!own.rerank_enabled);
        assert_eq!(own.bm25_weight, 1.0);
    }

    #[tokio::test]
    async fn test_errored_case_fails_and_is_excluded() {
        let searcher = TableSearcher::new(&[("good", &["a"])]);
        let mut harness = Harness::new(searcher).with_thresholds(Thresholds {
            precision_10: 0.1,
            ..Thresholds::default()
        });
        harness.add_test_cases([
            TestCase::new("good", "good", &["a"]),
            TestCase::new("missing", "missing", &["a"]),
        ]);

        let result = harness.run().await.unwrap();
        assert_eq!(result.failed_tests, 1);
        assert!(result.results[1].error.is_some());
        // mean over the one successful case only
        assert!((result.aggregate.mrr - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_harness() {
        let harness = Harness::new(TableSearcher::new(&[]));
        assert!(matches!(harness.run().await, Err(EvalError::NoTestCases)));
    }

    #[test]
    fn test_threshold_overrides() {
        let t = Thresholds::default()
            .with_overrides("p10=0.2, mrr=0.9,hit=1")
            .unwrap();
        assert!((t.precision_10 - 0.2).abs() < f64::EPSILON);
        assert!((t.mrr - 0.9).abs() < f64::EPSILON);
        assert!((t.hit_rate - 1.0).abs() < f64::EPSILON);
        assert!((t.recall_10 - 0.3).abs() < f64::EPSILON);

        assert!(matches!(
            Thresholds::default().with_overrides("p10"),
            Err(EvalError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            Thresholds::default().with_overrides("speed=1"),
            Err(EvalError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_pass_rule() {
        let t = Thresholds::default();
        let good = Metrics {
            precision_10: 0.5,
            mrr: 0.5,
            hit_rate: 1.0,
            ..Metrics::default()
        };
        assert!(t.passes(&good));
        // recall and ndcg do not gate individual tests
        assert!(good.recall_10 < t.recall_10);
        assert!(!t.passes(&Metrics { mrr: 0.4, ..good }));
    }

    #[test]
    fn test_load_suite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(
            &path,
            r#"{
                "name": "smoke",
                "description": "two cases",
                "version": "1",
                "created": "2024-01-01T00:00:00Z",
                "test_cases": [
                    {"name": "one", "query": "q1", "expected": ["a"], "tags": ["x"]},
                    {"name": "two", "query": "q2", "expected": ["b"],
                     "relevance_grades": {"b": 3}}
                ]
            }"#,
        )
        .unwrap();

        let mut harness = Harness::new(TableSearcher::new(&[]));
        harness.load_suite(&path).unwrap();
        assert_eq!(harness.test_cases().len(), 2);
        assert_eq!(harness.test_cases()[1].relevance_grades.as_ref().unwrap()["b"], 3);

        let missing = harness.load_suite(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(EvalError::Read { .. })));
    }
}
