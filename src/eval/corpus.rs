//! In-process evaluation corpus: nodes plus optional test cases.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::harness::{EvalError, EvalOutcome, TestCase};
use crate::gpu::Accelerator;
use crate::search::{
    CrossEncoder, HybridSearch, InMemoryNodeStore, Node, SearchError, TantivyBm25Index,
};
use crate::vector::{ClusterIndex, KMeansConfig};

/// Nodes to index, optionally with the test cases that grade them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Corpus {
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

    /// Indexes every node into a fresh pipeline.
    ///
    /// Embeddings go to a cluster index, which is clustered once the
    /// population reaches `min_embeddings_for_clustering`. Searchable text
    /// goes to an in-memory BM25 index.
    pub fn build_pipeline(
        &self,
        kmeans: KMeansConfig,
        accelerator: Accelerator,
        cross_encoder: Option<CrossEncoder>,
    ) -> EvalOutcome<HybridSearch> {
        let index = ClusterIndex::with_accelerator(kmeans, accelerator);
        let bm25 = TantivyBm25Index::new()?;
        let store = InMemoryNodeStore::new();

        for node in &self.nodes {
            if let Some(embedding) = &node.embedding {
                index.add(&node.id, embedding).map_err(SearchError::from)?;
            }
            let text = node.searchable_text();
            if !text.is_empty() {
                bm25.index_document(&node.id, &text)?;
            }
            store.insert(node.clone());
        }
        bm25.commit()?;
        let clustered = index.cluster_if_ready().map_err(SearchError::from)?;

        info!(
            "Indexed {} nodes ({} embeddings, {} text documents, clustered: {clustered})",
            store.len(),
            index.len(),
            bm25.num_docs()
        );

        let mut pipeline = HybridSearch::new(Arc::new(index), Arc::new(bm25), Arc::new(store));
        pipeline.set_cross_encoder(cross_encoder);
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::harness::{Harness, Thresholds};

    fn corpus() -> Corpus {
        serde_json::from_str(
            r#"{
                "nodes": [
                    {"id": "ml", "labels": ["Concept"],
                     "properties": {"title": "Machine learning", "content": "models learn from data"},
                     "embedding": [1.0, 0.0, 0.0]},
                    {"id": "db", "labels": ["Decision"],
                     "properties": {"title": "Database choice", "content": "graph storage engine"},
                     "embedding": [0.0, 1.0, 0.0]},
                    {"id": "auth", "labels": ["Code"],
                     "properties": {"content": "JWT authentication middleware"}}
                ],
                "test_cases": [
                    {"name": "vector", "query": "learning", "expected": ["ml"],
                     "embedding": [0.9, 0.1, 0.0]},
                    {"name": "text only", "query": "middleware", "expected": ["auth"]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_corpus_pipeline_passes_own_cases() {
        let corpus = corpus();
        let pipeline = corpus
            .build_pipeline(KMeansConfig::default(), Accelerator::cpu(), None)
            .unwrap();
        assert_eq!(pipeline.index().len(), 2);
        assert!(!pipeline.index().is_clustered());

        let mut harness = Harness::new(pipeline).with_thresholds(Thresholds {
            precision_10: 0.1,
            ..Thresholds::default()
        });
        harness.add_test_cases(corpus.test_cases.clone());
        let result = harness.run().await.unwrap();

        assert!(result.all_passed(), "{result:#?}");
        assert_eq!(result.results[0].search_method, "rrf_hybrid");
        assert_eq!(result.results[1].search_method, "fulltext");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Corpus::load(Path::new("/nonexistent/corpus.json"));
        assert!(matches!(result, Err(EvalError::Read { .. })));
    }
}
