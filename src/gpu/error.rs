//! Error types for the accelerator layer.

use thiserror::Error;

/// Errors raised by accelerator devices and their buffers.
///
/// Backend errors propagate verbatim to the caller, who may retry the
/// operation on the CPU reference backend.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error(
        "CUDA is not available on this system\nSuggestion: Build with the `cuda` feature and install the NVIDIA driver, or select the cpu backend"
    )]
    CudaNotAvailable,

    #[error(
        "Failed to create device {device_id}: {reason}\nSuggestion: Check that the device id is valid and the driver is loaded"
    )]
    DeviceCreation { device_id: usize, reason: String },

    #[error(
        "Failed to allocate {bytes} byte buffer: {reason}\nSuggestion: Reduce the batch size or free device memory"
    )]
    BufferCreation { bytes: usize, reason: String },

    #[error("Kernel execution failed during {operation}: {reason}")]
    KernelExecution {
        operation: &'static str,
        reason: String,
    },

    #[error(
        "Invalid buffer: {reason}\nSuggestion: Buffers must be created on the device that uses them and sized for n * dims"
    )]
    InvalidBuffer { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl GpuError {
    pub(crate) fn kernel(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::KernelExecution {
            operation,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_buffer(reason: impl Into<String>) -> Self {
        Self::InvalidBuffer {
            reason: reason.into(),
        }
    }
}

/// Result alias for accelerator operations.
pub type GpuResult<T> = Result<T, GpuError>;
