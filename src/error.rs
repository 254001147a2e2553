//! Crate-level error type.
//!
//! Each layer owns its own `thiserror` enum. [`NornicError`] wraps them for
//! callers that cross layers (the CLI, embedding applications) and maps
//! every variant onto a small [`ErrorCategory`] taxonomy.

use std::fmt;

use thiserror::Error;

use crate::eval::EvalError;
use crate::gpu::GpuError;
use crate::search::{RerankError, SearchError};
use crate::vector::VectorError;

#[derive(Error, Debug)]
pub enum NornicError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Rerank(#[from] RerankError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("Invalid configuration: {reason}\nSuggestion: Run 'nornic-search init --force' to regenerate the settings file")]
    Config { reason: String },
}

/// Broad failure classes used for exit codes and log grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Mismatched dimensions or an unavailable backend
    Configuration,
    /// Device or buffer allocation
    Resource,
    /// Kernel or compute failure
    Execution,
    /// Bad query or candidate input
    Validation,
    /// Rerank service or remote search endpoint
    ExternalService,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Resource => "resource",
            Self::Execution => "execution",
            Self::Validation => "validation",
            Self::ExternalService => "external service",
        };
        f.write_str(name)
    }
}

impl NornicError {
    /// Stable identifier for programmatic handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::Gpu(e) => match e {
                GpuError::CudaNotAvailable => "CUDA_NOT_AVAILABLE",
                GpuError::DeviceCreation { .. } => "DEVICE_CREATION_FAILED",
                GpuError::BufferCreation { .. } => "BUFFER_CREATION_FAILED",
                GpuError::KernelExecution { .. } => "KERNEL_EXECUTION_FAILED",
                GpuError::InvalidBuffer { .. } => "INVALID_BUFFER",
                GpuError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            },
            Self::Vector(e) => vector_status(e),
            Self::Search(e) => match e {
                SearchError::Vector(inner) => vector_status(inner),
                SearchError::FullText(_) => "FULLTEXT_ERROR",
                SearchError::IndexNotFound { .. } => "INDEX_NOT_FOUND",
                SearchError::UnboundParameter { .. } => "UNBOUND_PARAMETER",
                SearchError::InvalidParameter { .. } => "INVALID_PARAMETER",
                SearchError::NoEmbedder => "NO_EMBEDDER",
                SearchError::Embedding(_) => "EMBEDDING_FAILED",
            },
            Self::Rerank(e) => match e {
                RerankError::Http(_) => "RERANK_UNREACHABLE",
                RerankError::Status { .. } => "RERANK_STATUS",
                RerankError::MalformedResponse(_) => "RERANK_MALFORMED_RESPONSE",
                RerankError::Config(_) => "RERANK_CONFIG",
            },
            Self::Eval(e) => match e {
                EvalError::Read { .. } => "FILE_READ_ERROR",
                EvalError::Write { .. } => "FILE_WRITE_ERROR",
                EvalError::Parse { .. } => "PARSE_ERROR",
                EvalError::NoTestCases => "NO_TEST_CASES",
                EvalError::InvalidThreshold { .. } => "INVALID_THRESHOLD",
                EvalError::Http(_) => "SEARCH_REQUEST_FAILED",
                EvalError::Unreachable { .. } => "SERVER_UNREACHABLE",
                EvalError::Search(_) => "SEARCH_FAILED",
            },
            Self::Config { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Gpu(e) => gpu_category(e),
            Self::Vector(e) => vector_category(e),
            Self::Search(e) => search_category(e),
            Self::Rerank(RerankError::Config(_)) => ErrorCategory::Configuration,
            Self::Rerank(_) => ErrorCategory::ExternalService,
            Self::Eval(e) => match e {
                EvalError::Read { .. } | EvalError::Write { .. } => ErrorCategory::Resource,
                EvalError::Parse { .. }
                | EvalError::NoTestCases
                | EvalError::InvalidThreshold { .. } => ErrorCategory::Validation,
                EvalError::Http(_) | EvalError::Unreachable { .. } => {
                    ErrorCategory::ExternalService
                }
                EvalError::Search(inner) => search_category(inner),
            },
            Self::Config { .. } => ErrorCategory::Configuration,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self.category() {
            ErrorCategory::Configuration => vec![
                "Check the embedding dimensions match the index",
                "Set gpu.backend = \"cpu\" to rule out the accelerator",
            ],
            ErrorCategory::Resource => vec![
                "Check free device memory or fall back to the CPU backend",
                "Check that the file exists and you have permissions",
            ],
            ErrorCategory::Execution => vec![
                "Retry with NORNIC_GPU__BACKEND=cpu",
                "Run with RUST_LOG=debug for the failing stage",
            ],
            ErrorCategory::Validation => vec![
                "Check the query vector length and parameters",
                "Check the test suite JSON against the documented format",
            ],
            ErrorCategory::ExternalService => vec![
                "Check that the service URL is reachable",
                "Searches keep working without the rerank stage",
            ],
        }
    }
}

fn vector_status(error: &VectorError) -> &'static str {
    match error {
        VectorError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
        VectorError::EmptyVector => "EMPTY_VECTOR",
        VectorError::NonFinite { .. } => "NON_FINITE_VECTOR",
        VectorError::ClusteringFailed(_) => "CLUSTERING_FAILED",
        VectorError::ClusterCountUnset => "CLUSTER_COUNT_UNSET",
        VectorError::Gpu(e) => match e {
            GpuError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            _ => "ACCELERATOR_ERROR",
        },
    }
}

fn search_category(error: &SearchError) -> ErrorCategory {
    match error {
        SearchError::Vector(inner) => vector_category(inner),
        SearchError::FullText(_) | SearchError::Embedding(_) => ErrorCategory::Execution,
        SearchError::IndexNotFound { .. } | SearchError::NoEmbedder => {
            ErrorCategory::Configuration
        }
        SearchError::UnboundParameter { .. } | SearchError::InvalidParameter { .. } => {
            ErrorCategory::Validation
        }
    }
}

fn vector_category(error: &VectorError) -> ErrorCategory {
    match error {
        VectorError::DimensionMismatch { .. } | VectorError::ClusterCountUnset => {
            ErrorCategory::Configuration
        }
        VectorError::EmptyVector | VectorError::NonFinite { .. } => ErrorCategory::Validation,
        VectorError::ClusteringFailed(_) => ErrorCategory::Execution,
        VectorError::Gpu(e) => gpu_category(e),
    }
}

fn gpu_category(error: &GpuError) -> ErrorCategory {
    match error {
        GpuError::CudaNotAvailable | GpuError::DimensionMismatch { .. } => {
            ErrorCategory::Configuration
        }
        GpuError::DeviceCreation { .. } | GpuError::BufferCreation { .. } => {
            ErrorCategory::Resource
        }
        GpuError::KernelExecution { .. } => ErrorCategory::Execution,
        GpuError::InvalidBuffer { .. } => ErrorCategory::Validation,
    }
}

/// Result type alias for cross-layer operations
pub type NornicResult<T> = Result<T, NornicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_is_configuration() {
        let error: NornicError = VectorError::DimensionMismatch {
            expected: 4,
            actual: 3,
        }
        .into();
        assert_eq!(error.category(), ErrorCategory::Configuration);
        assert_eq!(error.status_code(), "DIMENSION_MISMATCH");
    }

    #[test]
    fn test_wrapped_search_error_keeps_vector_mapping() {
        let error: NornicError = SearchError::Vector(VectorError::EmptyVector).into();
        assert_eq!(error.category(), ErrorCategory::Validation);
        assert_eq!(error.status_code(), "EMPTY_VECTOR");
    }

    #[test]
    fn test_rerank_is_external_service() {
        let error: NornicError = RerankError::Status { status: 503 }.into();
        assert_eq!(error.category(), ErrorCategory::ExternalService);
        assert!(!error.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_gpu_allocation_is_resource() {
        let error: NornicError = GpuError::BufferCreation {
            bytes: 1024,
            reason: "out of memory".to_string(),
        }
        .into();
        assert_eq!(error.category(), ErrorCategory::Resource);
        assert_eq!(error.status_code(), "BUFFER_CREATION_FAILED");
    }
}
