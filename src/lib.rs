//! Approximate nearest-neighbour search for a property graph.
//!
//! - [`vector`]: flat and k-means clustered embedding indexes
//! - [`gpu`]: similarity backends (CPU reference, CUDA)
//! - [`search`]: hybrid retrieval with RRF fusion, MMR and cross-encoder
//!   reranking, plus the vector query procedure
//! - [`eval`]: IR metrics and a CI-friendly evaluation harness

pub mod config;
pub mod display;
pub mod error;
pub mod eval;
pub mod gpu;
pub mod io;
pub mod search;
pub mod vector;

pub use config::Settings;
pub use error::{ErrorCategory, NornicError, NornicResult};
pub use gpu::{Accelerator, BackendKind};
pub use search::{HybridSearch, SearchOptions, SearchResponse, VectorProcedure};
pub use vector::{ClusterIndex, EmbeddingIndex, KMeansConfig};
