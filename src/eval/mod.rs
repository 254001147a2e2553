//! Search quality evaluation.
//!
//! A [`Harness`] replays [`TestCase`]s against any [`Searcher`], grades the
//! returned ids with standard IR metrics and applies pass/fail
//! [`Thresholds`]. Searchers exist for the in-process pipeline (built from a
//! [`Corpus`] file) and for a running server over HTTP.

mod corpus;
mod harness;
mod http;
mod metrics;
mod reporter;

pub use corpus::Corpus;
pub use harness::{
    EvalError, EvalOutcome, EvalResult, Harness, SearchReply, Searcher, TestCase, TestResult,
    TestSuite, Thresholds,
};
pub use http::{HttpSearcher, demo_test_cases};
pub use metrics::{
    Metrics, average_precision, dcg, hit_rate, ideal_dcg, ndcg, precision, recall,
    reciprocal_rank,
};
pub use reporter::{OutputFormat, Reporter, save_json};
