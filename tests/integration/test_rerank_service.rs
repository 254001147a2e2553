//! Hybrid search against a mock cross-encoder service.

use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::routing::{get, post};
use axum::{Json, Router};
use nornic_search::search::{CrossEncoder, RerankCandidate, RerankConfig, SearchOptions};
use serde_json::{Value, json};

use crate::common::{graph_nodes, pipeline_for, spawn_server};

const API_KEY: &str = "test-key";

/// Cohere-style reranker that prefers later documents and requires a
/// bearer token.
async fn reverse_rerank(headers: HeaderMap, Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {API_KEY}"));
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let count = body["documents"].as_array().map_or(0, Vec::len);
    let results: Vec<Value> = (0..count)
        .map(|i| json!({"index": i, "relevance_score": i as f64 / count as f64}))
        .collect();
    Ok(Json(json!({ "results": results })))
}

async fn rerank_service() -> String {
    let router = Router::new()
        .route("/rerank", post(reverse_rerank))
        .route("/health", get(|| async { "ok" }));
    spawn_server(router).await
}

fn encoder(base: &str, api_key: Option<&str>) -> CrossEncoder {
    CrossEncoder::new(RerankConfig {
        enabled: true,
        api_url: format!("{base}/rerank"),
        api_key: api_key.map(str::to_string),
        timeout_secs: 5,
        ..RerankConfig::default()
    })
    .unwrap()
}

fn rerank_options() -> SearchOptions {
    SearchOptions {
        limit: 10,
        rerank_enabled: true,
        ..SearchOptions::default()
    }
}

fn ids(response: &nornic_search::SearchResponse) -> Vec<String> {
    response.results.iter().map(|h| h.id.clone()).collect()
}

#[tokio::test]
async fn test_cross_encoder_reorders_fused_results() {
    let base = rerank_service().await;
    let nodes = graph_nodes();
    let plain = pipeline_for(&nodes);
    let reranking = pipeline_for(&nodes).with_cross_encoder(encoder(&base, Some(API_KEY)));
    let query = [1.0, 0.0, 0.0];

    let before = plain
        .search("graph", Some(&query), &SearchOptions { limit: 10, ..SearchOptions::default() })
        .await
        .unwrap();
    let after = reranking
        .search("graph", Some(&query), &rerank_options())
        .await
        .unwrap();

    assert_eq!(before.search_method, "rrf_hybrid");
    assert_eq!(after.search_method, "rrf_hybrid+rerank");
    assert!(before.results.len() >= 3);

    let mut expected = ids(&before);
    expected.reverse();
    assert_eq!(ids(&after), expected);
    assert!(after.results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_rejected_request_keeps_rrf_order() {
    let base = rerank_service().await;
    let nodes = graph_nodes();
    let plain = pipeline_for(&nodes);
    let reranking = pipeline_for(&nodes).with_cross_encoder(encoder(&base, Some("wrong")));
    let query = [1.0, 0.0, 0.0];

    let before = plain
        .search("graph", Some(&query), &SearchOptions { limit: 10, ..SearchOptions::default() })
        .await
        .unwrap();
    let after = reranking
        .search("graph", Some(&query), &rerank_options())
        .await
        .unwrap();

    assert_eq!(after.search_method, "rrf_hybrid");
    assert_eq!(ids(&after), ids(&before));
    assert!(
        after
            .message
            .as_deref()
            .is_some_and(|m| m.contains("reranking skipped"))
    );
}

#[tokio::test]
async fn test_rerank_disabled_per_request() {
    let base = rerank_service().await;
    let search = pipeline_for(&graph_nodes()).with_cross_encoder(encoder(&base, Some(API_KEY)));

    let response = search
        .search("graph", Some(&[1.0, 0.0, 0.0]), &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(response.search_method, "rrf_hybrid");
}

#[tokio::test]
async fn test_health_probe() {
    let base = rerank_service().await;
    assert!(encoder(&base, None).is_available().await);
    assert!(!encoder("http://127.0.0.1:9", None).is_available().await);
}

#[tokio::test]
async fn test_rerank_top_k_and_min_score() {
    let base = rerank_service().await;
    let encoder = CrossEncoder::new(RerankConfig {
        enabled: true,
        api_url: format!("{base}/rerank"),
        api_key: Some(API_KEY.to_string()),
        top_k: 4,
        min_score: 0.5,
        ..RerankConfig::default()
    })
    .unwrap();

    let candidates: Vec<RerankCandidate> = (0..6)
        .map(|i| RerankCandidate {
            id: format!("c{i}"),
            content: format!("document {i}"),
            score: 1.0 - i as f64 / 10.0,
        })
        .collect();
    let results = encoder.rerank("document", &candidates).await.unwrap();

    // Only the first four are scored (0, .25, .5, .75); two clear 0.5.
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["c3", "c2"]);
    assert_eq!(results[0].original_rank, 4);
    assert_eq!(results[0].new_rank, 1);
    assert!((results[0].bi_score - 0.7).abs() < 1e-9);
}
