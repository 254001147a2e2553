//! Corpus file to report file, plus evaluation of a remote endpoint.

use std::fs;

use axum::routing::{get, post};
use axum::{Json, Router};
use nornic_search::eval::{
    Corpus, EvalResult, Harness, HttpSearcher, OutputFormat, Reporter, TestCase, Thresholds,
    save_json,
};
use nornic_search::gpu::Accelerator;
use nornic_search::io::ExitCode;
use nornic_search::KMeansConfig;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::common::{graph_nodes, spawn_server};

fn write_corpus(dir: &TempDir) -> std::path::PathBuf {
    let corpus = json!({
        "nodes": graph_nodes(),
        "test_cases": [
            {"name": "graph storage", "query": "graph database", "expected": ["n1"],
             "embedding": [1.0, 0.0, 0.0]},
            {"name": "bread", "query": "sourdough", "expected": ["n4"]}
        ]
    });
    let path = dir.path().join("corpus.json");
    fs::write(&path, serde_json::to_string_pretty(&corpus).unwrap()).unwrap();
    path
}

fn lenient() -> Thresholds {
    Thresholds {
        precision_10: 0.1,
        ..Thresholds::default()
    }
}

#[tokio::test]
async fn test_corpus_eval_report_and_exit_code() {
    let dir = TempDir::new().unwrap();
    let corpus = Corpus::load(&write_corpus(&dir)).unwrap();
    let pipeline = corpus
        .build_pipeline(KMeansConfig::default(), Accelerator::cpu(), None)
        .unwrap();

    let mut harness = Harness::new(pipeline)
        .with_thresholds(lenient())
        .with_suite_name("graph");
    harness.add_test_cases(corpus.test_cases.clone());
    let result = harness.run().await.unwrap();

    assert_eq!(result.total_tests, 2);
    assert!(result.all_passed(), "{result:#?}");
    assert_eq!(ExitCode::from_eval(&result), ExitCode::Success);
    assert_eq!(result.results[1].search_method, "fulltext");

    let mut reporter = Reporter::new(Vec::new());
    reporter.print(&result, OutputFormat::Compact).unwrap();
    let line = String::from_utf8(reporter.into_inner()).unwrap();
    assert!(line.starts_with("[PASS] 2/2 tests"), "{line}");

    let report = dir.path().join("out").join("report.json");
    fs::create_dir_all(report.parent().unwrap()).unwrap();
    save_json(&result, &report).unwrap();
    let saved: EvalResult = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(saved.suite_name, "graph");
    assert_eq!(saved.passed_tests, 2);
}

#[tokio::test]
async fn test_suite_file_with_failing_case_gates_ci() {
    let dir = TempDir::new().unwrap();
    let corpus = Corpus::load(&write_corpus(&dir)).unwrap();
    let pipeline = corpus
        .build_pipeline(KMeansConfig::default(), Accelerator::cpu(), None)
        .unwrap();

    let suite = json!({
        "name": "regressions",
        "description": "cases that must keep passing",
        "version": "1",
        "created": "2026-01-15T09:30:00Z",
        "test_cases": [
            {"name": "graph storage", "query": "graph database", "expected": ["n1"],
             "embedding": [1.0, 0.0, 0.0]},
            {"name": "missing node", "query": "grocery", "expected": ["does-not-exist"]}
        ]
    });
    let suite_path = dir.path().join("suite.json");
    fs::write(&suite_path, suite.to_string()).unwrap();

    let mut harness = Harness::new(pipeline).with_thresholds(lenient());
    harness.load_suite(&suite_path).unwrap();
    let result = harness.run().await.unwrap();

    assert_eq!(result.suite_name, "regressions");
    assert_eq!(result.passed_tests, 1);
    assert_eq!(result.failed_tests, 1);
    assert_eq!(ExitCode::from_eval(&result), ExitCode::GeneralError);
}

async fn search_endpoint(Json(body): Json<Value>) -> Json<Value> {
    let rows = match body["query"].as_str() {
        Some(q) if q.contains("graph") => json!([
            {"node": {"id": "n1"}, "score": 0.9},
            {"node": {"id": "n2"}, "score": 0.8}
        ]),
        _ => json!([]),
    };
    Json(rows)
}

#[tokio::test]
async fn test_http_searcher_against_mock_server() {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/nornicdb/search", post(search_endpoint));
    let base = spawn_server(router).await;

    let searcher = HttpSearcher::new(format!("{base}/")).unwrap();
    searcher.check_health().await.unwrap();

    let mut harness = Harness::new(searcher).with_thresholds(lenient());
    harness.add_test_case(TestCase::new("graph", "graph databases", &["n1", "n2"]));
    harness.add_test_case(TestCase::new("nothing", "bread", &["n4"]));
    let result = harness.run().await.unwrap();

    assert_eq!(result.results[0].search_method, "http");
    assert_eq!(result.results[0].returned, ["n1", "n2"]);
    assert_eq!(result.results[0].metrics.mrr, 1.0);
    assert!(result.results[0].passed);
    assert!(!result.results[1].passed);
    assert!(result.results[1].error.is_none());
}

#[tokio::test]
async fn test_http_searcher_unhealthy_server() {
    let router = Router::new().route(
        "/health",
        get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
    );
    let base = spawn_server(router).await;

    let searcher = HttpSearcher::new(base).unwrap();
    assert!(searcher.check_health().await.is_err());
}
