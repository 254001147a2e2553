#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use nornic_search::search::{HybridSearch, InMemoryNodeStore, Node, TantivyBm25Index};
use nornic_search::{ClusterIndex, KMeansConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform vectors in `[-1, 1)`, reproducible per seed.
pub fn random_vectors(n: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dims).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}

/// Points scattered tightly around a one-hot direction.
pub fn blob(axis: usize, dims: usize, n: usize, spread: f32, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut v: Vec<f32> = (0..dims)
                .map(|_| rng.random_range(-spread..spread))
                .collect();
            v[axis] += 1.0;
            v
        })
        .collect()
}

/// Four small nodes about graphs plus one off-topic node.
pub fn graph_nodes() -> Vec<Node> {
    let rows: [(&str, [f32; 3], &str, &str); 5] = [
        ("n1", [1.0, 0.0, 0.0], "Concept", "graph database storage engine"),
        ("n2", [0.9, 0.3, 0.0], "Concept", "graph traversal queries"),
        ("n3", [0.7, 0.7, 0.0], "Code", "vector index for graph search"),
        ("n4", [0.0, 0.0, 1.0], "Memory", "sourdough bread recipe"),
        ("n5", [0.0, 1.0, 0.0], "Memory", "weekly grocery list"),
    ];
    rows.into_iter()
        .map(|(id, embedding, label, content)| {
            Node::new(id)
                .with_label(label)
                .with_property("title", id)
                .with_property("content", content)
                .with_embedding(embedding.to_vec())
        })
        .collect()
}

/// Hybrid pipeline over `nodes` with an unclustered index.
pub fn pipeline_for(nodes: &[Node]) -> HybridSearch {
    let index = ClusterIndex::new(KMeansConfig::default()).with_seed(11);
    let bm25 = TantivyBm25Index::new().expect("Failed to create BM25 index");
    let store = InMemoryNodeStore::new();
    for node in nodes {
        if let Some(embedding) = &node.embedding {
            index.add(&node.id, embedding).expect("Failed to add embedding");
        }
        bm25.index_document(&node.id, &node.searchable_text())
            .expect("Failed to index document");
        store.insert(node.clone());
    }
    bm25.commit().expect("Failed to commit BM25 index");
    HybridSearch::new(Arc::new(index), Arc::new(bm25), Arc::new(store))
}

/// Serves `router` on an ephemeral localhost port and returns its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Listener has no address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Test server failed");
    });
    format!("http://{addr}")
}
