//! Hybrid retrieval over the vector index and a full-text source.

pub mod bm25;
pub mod mmr;
pub mod pipeline;
pub mod procedure;
pub mod rerank;
pub mod rrf;
pub mod store;
pub mod types;

pub use bm25::{Bm25Source, ScoredId, TantivyBm25Index};
pub use pipeline::HybridSearch;
pub use procedure::{Embedder, VectorProcedure, VectorQuery};
pub use rerank::{
    CrossEncoder, RerankCandidate, RerankConfig, RerankError, RerankOutcome, RerankResult,
};
pub use rrf::{FusedHit, RrfParams, fuse};
pub use store::{InMemoryNodeStore, Node, NodeStore, SEARCHABLE_PROPERTIES};
pub use types::{
    Retrieval, SearchError, SearchHit, SearchMethod, SearchMetrics, SearchOptions, SearchOutcome,
    SearchResponse, adaptive_weights,
};
