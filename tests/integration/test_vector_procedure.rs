//! The vector query procedure over a clustered index.

use std::collections::HashMap;
use std::sync::Arc;

use nornic_search::search::{
    Embedder, InMemoryNodeStore, Node, SearchError, SearchOutcome, VectorProcedure, VectorQuery,
};
use nornic_search::{ClusterIndex, KMeansConfig};
use serde_json::json;

use crate::common::random_vectors;

const DIMS: usize = 16;

struct AxisEmbedder;

impl Embedder for AxisEmbedder {
    fn embed(&self, text: &str) -> SearchOutcome<Vec<f32>> {
        let mut v = vec![0.0; DIMS];
        v[text.len() % DIMS] = 1.0;
        Ok(v)
    }
}

fn procedure() -> (VectorProcedure, Vec<Vec<f32>>) {
    let vectors = random_vectors(200, DIMS, 3);
    let index = ClusterIndex::new(KMeansConfig {
        num_clusters: 8,
        probe_clusters: 8,
        ..KMeansConfig::default()
    })
    .with_seed(3);
    let store = InMemoryNodeStore::new();
    for (i, v) in vectors.iter().enumerate() {
        let id = format!("node-{i}");
        index.add(&id, v).unwrap();
        store.insert(Node::new(&id).with_label("Doc").with_embedding(v.clone()));
    }
    index.cluster().unwrap();

    let procedure = VectorProcedure::new(Arc::new(store)).with_embedder(Arc::new(AxisEmbedder));
    procedure.register("doc_embeddings", Arc::new(index));
    (procedure, vectors)
}

#[test]
fn test_clustered_query_matches_brute_force_when_probing_all() {
    let (procedure, vectors) = procedure();
    let index = procedure.index("doc_embeddings").unwrap();
    assert!(index.is_clustered());

    let query = VectorQuery::Vector(vectors[42].clone());
    let hits = procedure
        .query_nodes("doc_embeddings", 10, &query, &HashMap::new())
        .unwrap();
    let exact = index.search(&vectors[42], 10).unwrap();

    assert_eq!(hits.len(), 10);
    assert_eq!(hits[0].0.id, "node-42");
    assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    let hit_ids: Vec<&str> = hits.iter().map(|(n, _)| n.id.as_str()).collect();
    let exact_ids: Vec<&str> = exact.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(hit_ids, exact_ids);
}

#[test]
fn test_parameter_and_text_queries() {
    let (procedure, vectors) = procedure();
    let params = HashMap::from([
        ("vec".to_string(), json!(vectors[7])),
        ("text".to_string(), json!("find me")),
    ]);

    let by_vector = procedure
        .query_nodes(
            "doc_embeddings",
            3,
            &VectorQuery::Parameter("vec".to_string()),
            &params,
        )
        .unwrap();
    assert_eq!(by_vector[0].0.id, "node-7");

    let by_text = procedure
        .query_nodes(
            "doc_embeddings",
            5,
            &VectorQuery::Parameter("text".to_string()),
            &params,
        )
        .unwrap();
    assert_eq!(by_text.len(), 5);
}

#[test]
fn test_unknown_index_and_wrong_width() {
    let (procedure, _) = procedure();

    let missing = procedure.query_nodes(
        "nope",
        5,
        &VectorQuery::Vector(vec![0.0; DIMS]),
        &HashMap::new(),
    );
    assert!(matches!(missing, Err(SearchError::IndexNotFound { .. })));

    let narrow = procedure.query_nodes(
        "doc_embeddings",
        5,
        &VectorQuery::Vector(vec![1.0; DIMS - 1]),
        &HashMap::new(),
    );
    assert!(matches!(narrow, Err(SearchError::Vector(_))));
}
