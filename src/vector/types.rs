//! Core value types and errors for the vector indexes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gpu::GpuError;

/// One ranked hit from a vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Node identifier the embedding belongs to.
    pub id: String,
    /// Cosine similarity to the query, in `[-1, 1]`.
    pub score: f32,
}

impl SearchResult {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }

    /// Cosine distance, `1 - score`.
    #[must_use]
    pub fn distance(&self) -> f32 {
        1.0 - self.score
    }
}

/// Vector dimensionality, fixed for the lifetime of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::EmptyVector);
        }
        Ok(Self(dim))
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Errors that can occur during vector index operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty vector provided\nSuggestion: Embeddings must have at least one component")]
    EmptyVector,

    #[error(
        "Vector for '{id}' contains non-finite values\nSuggestion: Check the embedding model output for NaN or infinity"
    )]
    NonFinite { id: String },

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure sufficient vectors are available for clustering (minimum: k clusters)"
    )]
    ClusteringFailed(String),

    #[error(
        "No cluster count configured\nSuggestion: Set kmeans.num_clusters or enable kmeans.auto_k"
    )]
    ClusterCountUnset,

    #[error("Accelerator error: {0}")]
    Gpu(#[from] GpuError),
}

/// Result alias for vector index operations.
pub type VectorResult<T> = Result<T, VectorError>;

/// Sorts hits by descending score. The sort is stable, so equal scores
/// keep their incoming order.
pub(crate) fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_dimension() {
        let dim = VectorDimension::new(64).unwrap();
        assert_eq!(dim.get(), 64);
        assert!(VectorDimension::new(0).is_err());

        assert!(dim.validate_vector(&[0.1; 64]).is_ok());
        assert!(matches!(
            dim.validate_vector(&[0.1; 10]),
            Err(VectorError::DimensionMismatch {
                expected: 64,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_search_result_distance() {
        let hit = SearchResult::new("node-1", 0.75);
        assert!((hit.distance() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_sort_by_score_is_stable() {
        let mut hits = vec![
            SearchResult::new("a", 0.5),
            SearchResult::new("b", 0.9),
            SearchResult::new("c", 0.5),
        ];
        sort_by_score(&mut hits);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_error_messages_carry_suggestions() {
        let err = VectorError::DimensionMismatch {
            expected: 3,
            actual: 2,
        };
        assert!(err.to_string().contains("Suggestion"));
    }
}
