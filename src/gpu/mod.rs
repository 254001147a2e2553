//! Accelerated similarity primitives with a CPU fallback.
//!
//! # Architecture
//! Every backend implements the [`Device`]/[`Buffer`] capability pair. The
//! backend in use is chosen once at startup and carried around as an
//! [`Accelerator`] value, so nothing above this module depends on a vendor
//! API or on the `cuda` cargo feature.
//!
//! # Backends
//! - `cpu`: pure Rust reference implementation, always available
//! - `cuda`: cuBLAS matrix-vector products, requires the `cuda` feature

mod cpu;
mod cuda;
mod device;
mod error;
#[cfg(feature = "cuda")]
mod ffi;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use cpu::{CpuBuffer, CpuDevice, cosine_similarity};
pub(crate) use cpu::{dot, normalize_in_place};
pub use cuda::{CudaBuffer, CudaDevice};
pub use device::{Buffer, Device, DeviceInfo, MemoryKind, TopK, select_top_k};
pub use error::{GpuError, GpuResult};

/// Backend requested in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CUDA when a device is present, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            other => Err(format!("unknown backend '{other}', expected auto, cpu or cuda")),
        }
    }
}

/// Whether a backend can be used on this machine.
pub fn is_available(backend: BackendKind) -> bool {
    match backend {
        BackendKind::Auto | BackendKind::Cpu => true,
        BackendKind::Cuda => cuda::is_available(),
    }
}

/// Number of devices a backend exposes.
pub fn device_count(backend: BackendKind) -> usize {
    match backend {
        BackendKind::Auto => 1 + cuda::device_count(),
        BackendKind::Cpu => 1,
        BackendKind::Cuda => cuda::device_count(),
    }
}

/// The similarity backend selected for this process.
#[derive(Debug)]
pub enum Accelerator {
    Cpu(CpuDevice),
    Cuda(CudaDevice),
}

impl Default for Accelerator {
    fn default() -> Self {
        Self::cpu()
    }
}

impl Accelerator {
    pub fn cpu() -> Self {
        Self::Cpu(CpuDevice::new())
    }

    pub fn cuda(device_id: usize) -> GpuResult<Self> {
        CudaDevice::new(device_id).map(Self::Cuda)
    }

    /// Resolves a configured backend into a live device.
    ///
    /// `Auto` quietly settles on the CPU when no CUDA device can be opened;
    /// an explicit `Cuda` request surfaces the failure instead.
    pub fn from_config(backend: BackendKind, device_id: usize) -> GpuResult<Self> {
        let accelerator = match backend {
            BackendKind::Cpu => Self::cpu(),
            BackendKind::Cuda => Self::cuda(device_id)?,
            BackendKind::Auto => match Self::cuda(device_id) {
                Ok(accelerator) => accelerator,
                Err(e) => {
                    debug!("CUDA unavailable, using CPU backend: {e}");
                    Self::cpu()
                }
            },
        };
        info!(
            "Similarity backend: {} ({})",
            accelerator.backend(),
            accelerator.info().name
        );
        Ok(accelerator)
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Cpu(_) => BackendKind::Cpu,
            Self::Cuda(_) => BackendKind::Cuda,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        match self {
            Self::Cpu(device) => device.info(),
            Self::Cuda(device) => device.info(),
        }
    }

    /// Brute-force top-k over a host matrix of `n` rows.
    ///
    /// Device backends stage the matrix into a scoped device buffer that is
    /// released before returning. The CPU backend scores the host rows
    /// directly.
    pub fn search(
        &self,
        embeddings: &[f32],
        query: &[f32],
        n: usize,
        dims: usize,
        k: usize,
        normalized: bool,
    ) -> GpuResult<TopK> {
        device::check_matrix(embeddings.len(), n, dims)?;
        if query.len() != dims {
            return Err(GpuError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }
        if n == 0 || k == 0 {
            return Ok(TopK::default());
        }

        match self {
            Self::Cpu(_) => {
                let mut scores = vec![0.0f32; n];
                if dims > 0 {
                    cpu::batched_cosine(&embeddings[..n * dims], query, &mut scores, dims, normalized);
                }
                Ok(select_top_k(&scores, k))
            }
            Self::Cuda(device) => staged_search(device, embeddings, query, n, dims, k, normalized),
        }
    }

    /// L2-normalizes `n` rows of `vectors` in place.
    pub fn normalize(&self, vectors: &mut [f32], n: usize, dims: usize) -> GpuResult<()> {
        device::check_matrix(vectors.len(), n, dims)?;
        match self {
            Self::Cpu(_) => {
                if dims > 0 {
                    vectors[..n * dims]
                        .chunks_mut(dims)
                        .for_each(normalize_in_place);
                }
                Ok(())
            }
            Self::Cuda(device) => {
                let mut buffer = device.new_buffer(&vectors[..n * dims], MemoryKind::Device)?;
                device.normalize(&mut buffer, n, dims)?;
                let normalized = buffer.read()?;
                buffer.release();
                vectors[..n * dims].copy_from_slice(&normalized);
                Ok(())
            }
        }
    }
}

fn staged_search<D: Device>(
    device: &D,
    embeddings: &[f32],
    query: &[f32],
    n: usize,
    dims: usize,
    k: usize,
    normalized: bool,
) -> GpuResult<TopK> {
    let staged = device.new_buffer(&embeddings[..n * dims], MemoryKind::Device)?;
    let top = device.search(&staged, query, n, dims, k, normalized)?;
    staged.release();
    Ok(top)
}
