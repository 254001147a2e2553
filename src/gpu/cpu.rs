//! Pure CPU reference backend.
//!
//! Always available. Batched operations fan out across rows with rayon.

use rayon::prelude::*;

use super::device::{Buffer, Device, DeviceInfo, MemoryKind, TopK, check_matrix, select_top_k};
use super::error::{GpuError, GpuResult};

/// Rows with a norm at or below this are left unscaled.
pub(crate) const NORM_EPSILON: f32 = 1e-10;

/// Host memory standing in for a device allocation.
#[derive(Debug, Clone)]
pub struct CpuBuffer {
    data: Vec<f32>,
    kind: MemoryKind,
}

impl CpuBuffer {
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

impl Buffer for CpuBuffer {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn kind(&self) -> MemoryKind {
        self.kind
    }

    fn read(&self) -> GpuResult<Vec<f32>> {
        Ok(self.data.clone())
    }
}

/// The CPU reference device.
#[derive(Debug, Clone)]
pub struct CpuDevice {
    info: DeviceInfo,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDevice {
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                id: 0,
                name: format!("cpu ({} threads)", rayon::current_num_threads()),
                memory_bytes: 0,
                compute_capability: (0, 0),
            },
        }
    }
}

impl Device for CpuDevice {
    type Buffer = CpuBuffer;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_buffer(&self, data: &[f32], kind: MemoryKind) -> GpuResult<CpuBuffer> {
        Ok(CpuBuffer {
            data: data.to_vec(),
            kind,
        })
    }

    fn new_empty_buffer(&self, count: usize, kind: MemoryKind) -> GpuResult<CpuBuffer> {
        Ok(CpuBuffer {
            data: vec![0.0; count],
            kind,
        })
    }

    fn normalize(&self, vectors: &mut CpuBuffer, n: usize, dims: usize) -> GpuResult<()> {
        check_matrix(vectors.len(), n, dims)?;
        if dims == 0 {
            return Ok(());
        }
        vectors.data[..n * dims]
            .par_chunks_mut(dims)
            .for_each(normalize_in_place);
        Ok(())
    }

    fn cosine_similarity(
        &self,
        embeddings: &CpuBuffer,
        query: &CpuBuffer,
        scores: &mut CpuBuffer,
        n: usize,
        dims: usize,
        normalized: bool,
    ) -> GpuResult<()> {
        check_matrix(embeddings.len(), n, dims)?;
        if query.len() != dims {
            return Err(GpuError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }
        if scores.len() < n {
            return Err(GpuError::invalid_buffer(format!(
                "score buffer holds {} floats, {n} required",
                scores.len()
            )));
        }
        if dims == 0 {
            scores.data[..n].fill(0.0);
            return Ok(());
        }

        batched_cosine(
            &embeddings.data[..n * dims],
            query.as_slice(),
            &mut scores.data[..n],
            dims,
            normalized,
        );
        Ok(())
    }

    fn top_k(&self, scores: &CpuBuffer, n: usize, k: usize) -> GpuResult<TopK> {
        if scores.len() < n {
            return Err(GpuError::invalid_buffer(format!(
                "score buffer holds {} floats, {n} requested",
                scores.len()
            )));
        }
        Ok(select_top_k(&scores.data[..n], k))
    }
}

/// Row-parallel `scores[i] = cos(rows[i], query)` over a host matrix.
///
/// `rows.len()` must equal `scores.len() * dims` and `dims` must be non-zero.
pub(crate) fn batched_cosine(
    rows: &[f32],
    query: &[f32],
    scores: &mut [f32],
    dims: usize,
    normalized: bool,
) {
    let query_norm = if normalized { 1.0 } else { norm(query) };
    scores
        .par_iter_mut()
        .zip(rows.par_chunks(dims))
        .for_each(|(score, row)| {
            let product = dot(row, query);
            *score = if normalized {
                product
            } else {
                let denom = norm(row) * query_norm;
                if denom > NORM_EPSILON {
                    product / denom
                } else {
                    0.0
                }
            };
        });
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Scales `v` to unit length unless its norm is below [`NORM_EPSILON`].
pub(crate) fn normalize_in_place(v: &mut [f32]) {
    let n = norm(v);
    if n > NORM_EPSILON {
        let inv = 1.0 / n;
        for x in v.iter_mut() {
            *x *= inv;
        }
    }
}

/// Cosine similarity of two equal-length slices, `0.0` for zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    let denom = norm(a) * norm(b);
    if denom > NORM_EPSILON {
        dot(a, b) / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rows() {
        let device = CpuDevice::new();
        let mut buf = device
            .new_buffer(&[3.0, 4.0, 0.0, 0.0], MemoryKind::Pinned)
            .unwrap();
        device.normalize(&mut buf, 2, 2).unwrap();

        let data = buf.read().unwrap();
        assert!((data[0] - 0.6).abs() < 1e-6);
        assert!((data[1] - 0.8).abs() < 1e-6);
        // zero row stays zero instead of turning into NaN
        assert_eq!(&data[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity_batched() {
        let device = CpuDevice::new();
        let embeddings = device
            .new_buffer(&[1.0, 0.0, 0.0, 2.0, 1.0, 1.0], MemoryKind::Device)
            .unwrap();
        let query = device.new_buffer(&[1.0, 0.0], MemoryKind::Device).unwrap();
        let mut scores = device.new_empty_buffer(3, MemoryKind::Device).unwrap();

        device
            .cosine_similarity(&embeddings, &query, &mut scores, 3, 2, false)
            .unwrap();
        let scores = scores.read().unwrap();
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!(scores[1].abs() < 1e-6);
        assert!((scores[2] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_rejects_wrong_query_length() {
        let device = CpuDevice::new();
        let embeddings = device.new_buffer(&[1.0, 0.0], MemoryKind::Device).unwrap();
        let query = device.new_buffer(&[1.0, 0.0, 0.0], MemoryKind::Device).unwrap();
        let mut scores = device.new_empty_buffer(1, MemoryKind::Device).unwrap();

        let result = device.cosine_similarity(&embeddings, &query, &mut scores, 1, 2, true);
        assert!(matches!(
            result,
            Err(GpuError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_top_k_scenario() {
        let device = CpuDevice::new();
        let scores = device
            .new_buffer(&[0.9, 0.1, 0.5], MemoryKind::Device)
            .unwrap();
        let top = device.top_k(&scores, 3, 2).unwrap();
        assert_eq!(top.indices, vec![0, 2]);
        assert_eq!(top.scores, vec![0.9, 0.5]);
    }

    #[test]
    fn test_search_returns_min_k_n() {
        let device = CpuDevice::new();
        let mut embeddings = device
            .new_buffer(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0], MemoryKind::Device)
            .unwrap();
        device.normalize(&mut embeddings, 3, 2).unwrap();

        let top = device.search(&embeddings, &[1.0, 0.0], 3, 2, 10, true).unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top.indices[0], 0);
        assert_eq!(top.indices[1], 2);

        let top = device.search(&embeddings, &[0.0, 1.0], 3, 2, 1, true).unwrap();
        assert_eq!(top.indices, vec![1]);
    }

    #[test]
    fn test_buffer_size_bytes() {
        let device = CpuDevice::new();
        let buf = device.new_empty_buffer(16, MemoryKind::Pinned).unwrap();
        assert_eq!(buf.size_bytes(), 64);
        assert_eq!(buf.kind(), MemoryKind::Pinned);
        buf.release();
    }
}
