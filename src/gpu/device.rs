//! Device and buffer capabilities shared by every backend.
//!
//! A [`Device`] owns a vendor context (BLAS handle, execution stream) and
//! hands out [`Buffer`]s that it alone may operate on. Buffers are single
//! owner handles: dropping one frees the underlying memory exactly once, so
//! early returns through `?` never leak.

use std::fmt;

use serde::Serialize;

use super::error::{GpuError, GpuResult};

/// Where a buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Device resident memory.
    Device,
    /// Page-locked host memory for fast transfers.
    Pinned,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Pinned => write!(f, "pinned"),
        }
    }
}

/// Static description of a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub id: usize,
    pub name: String,
    pub memory_bytes: u64,
    pub compute_capability: (u32, u32),
}

/// Highest scoring rows of a similarity pass, best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopK {
    pub indices: Vec<usize>,
    pub scores: Vec<f32>,
}

impl TopK {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterates `(row, score)` pairs in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices.iter().copied().zip(self.scores.iter().copied())
    }
}

/// A region of accelerator or pinned host memory holding `f32` values.
pub trait Buffer: Send {
    /// Number of `f32` elements.
    fn len(&self) -> usize;

    fn kind(&self) -> MemoryKind;

    /// Copies the buffer contents back to host memory.
    fn read(&self) -> GpuResult<Vec<f32>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn size_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }

    /// Releases the buffer now instead of at scope exit.
    fn release(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

/// Batched similarity primitives implemented by each backend.
///
/// Embeddings are laid out row-major: `n` rows of `dims` floats.
pub trait Device: Send + Sync {
    type Buffer: Buffer;

    fn info(&self) -> &DeviceInfo;

    /// Allocates a buffer initialized with a copy of `data`.
    fn new_buffer(&self, data: &[f32], kind: MemoryKind) -> GpuResult<Self::Buffer>;

    /// Allocates an uninitialized buffer of `count` floats.
    fn new_empty_buffer(&self, count: usize, kind: MemoryKind) -> GpuResult<Self::Buffer>;

    /// L2-normalizes each row in place. Rows with a norm below `1e-10` are
    /// left untouched.
    fn normalize(&self, vectors: &mut Self::Buffer, n: usize, dims: usize) -> GpuResult<()>;

    /// Computes `scores[i] = cos(embeddings[i], query)` as one batched
    /// matrix-vector product. With `normalized` set, inputs are assumed to
    /// be unit length and the plain dot product is used.
    fn cosine_similarity(
        &self,
        embeddings: &Self::Buffer,
        query: &Self::Buffer,
        scores: &mut Self::Buffer,
        n: usize,
        dims: usize,
        normalized: bool,
    ) -> GpuResult<()>;

    /// Selects the `k` highest scores, stable on ties.
    fn top_k(&self, scores: &Self::Buffer, n: usize, k: usize) -> GpuResult<TopK>;

    /// Query buffer creation, similarity and top-k selection in one call.
    ///
    /// Every temporary buffer is released before returning, including on
    /// the error paths.
    fn search(
        &self,
        embeddings: &Self::Buffer,
        query: &[f32],
        n: usize,
        dims: usize,
        k: usize,
        normalized: bool,
    ) -> GpuResult<TopK> {
        check_matrix(embeddings.len(), n, dims)?;
        if query.len() != dims {
            return Err(GpuError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }
        if n == 0 || k == 0 {
            return Ok(TopK::default());
        }

        let query_buffer = self.new_buffer(query, MemoryKind::Device)?;
        let mut scores = self.new_empty_buffer(n, MemoryKind::Device)?;
        self.cosine_similarity(embeddings, &query_buffer, &mut scores, n, dims, normalized)?;
        let top = self.top_k(&scores, n, k)?;

        scores.release();
        query_buffer.release();
        Ok(top)
    }
}

/// Verifies that a buffer of `len` floats holds an `n x dims` matrix.
pub(crate) fn check_matrix(len: usize, n: usize, dims: usize) -> GpuResult<()> {
    match n.checked_mul(dims) {
        Some(expected) if expected <= len => Ok(()),
        _ => Err(GpuError::invalid_buffer(format!(
            "buffer holds {len} floats, {n} x {dims} required"
        ))),
    }
}

/// Host-side top-k selection shared by all backends.
///
/// Ties keep ascending row order. NaN scores rank last.
pub fn select_top_k(scores: &[f32], k: usize) -> TopK {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        let (sa, sb) = (rank_key(scores[a]), rank_key(scores[b]));
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(k);

    let scores = order.iter().map(|&i| scores[i]).collect();
    TopK {
        indices: order,
        scores,
    }
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_top_k_orders_by_score() {
        let top = select_top_k(&[0.9, 0.1, 0.5], 2);
        assert_eq!(top.indices, vec![0, 2]);
        assert_eq!(top.scores, vec![0.9, 0.5]);
    }

    #[test]
    fn test_select_top_k_is_stable_on_ties() {
        let top = select_top_k(&[0.3, 0.7, 0.7, 0.3], 4);
        assert_eq!(top.indices, vec![1, 2, 0, 3]);
    }

    #[test]
    fn test_select_top_k_returns_all_when_k_exceeds_n() {
        let top = select_top_k(&[0.2, 0.4], 10);
        assert_eq!(top.indices, vec![1, 0]);
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn test_select_top_k_ranks_nan_last() {
        let top = select_top_k(&[f32::NAN, 0.1], 2);
        assert_eq!(top.indices, vec![1, 0]);
    }

    #[test]
    fn test_check_matrix() {
        assert!(check_matrix(6, 2, 3).is_ok());
        assert!(matches!(
            check_matrix(5, 2, 3),
            Err(GpuError::InvalidBuffer { .. })
        ));
        assert!(check_matrix(0, usize::MAX, 2).is_err());
    }
}
