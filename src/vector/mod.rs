//! Embedding indexes for approximate nearest-neighbour search.
//!
//! # Performance Targets
//! - Brute-force search: O(n * d) per query, batched through the accelerator
//! - Clustered search: O(K * d + m * d) for `m` probed members
//! - Clustering: O(n * K * d * iterations), run infrequently
//!
//! # Architecture
//! [`EmbeddingIndex`] is a flat store searched exhaustively. [`ClusterIndex`]
//! wraps the same row storage with a k-means partition for IVF-style
//! probing, falling back to the exhaustive path until it has been clustered.
//! Both route similarity through a [`crate::gpu::Accelerator`] chosen at
//! construction time.

mod cluster_index;
mod clustering;
mod index;
mod types;

pub use cluster_index::{ClusterIndex, ClusterStats};
pub use clustering::{
    InitMethod, KMeansConfig, KMeansResult, MAX_AUTO_CLUSTERS, MIN_AUTO_CLUSTERS, kmeans,
    nearest_centroid, nearest_centroids, optimal_k, squared_euclidean,
};
pub use index::EmbeddingIndex;
pub use types::{SearchResult, VectorDimension, VectorError, VectorResult};
