//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success - every evaluated test met its thresholds
//! - `1`: General error, or at least one test failed (CI gate)
//! - `2`: Blocking error - critical failure that should halt automation
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::error::{ErrorCategory, NornicError};
use crate::eval::EvalResult;

/// Standard exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error, or failed eval thresholds (code 1)
    GeneralError = 1,

    /// Critical error that should halt automation (code 2)
    BlockingError = 2,

    /// Input file or suite could not be parsed (code 4)
    ParseError = 4,

    /// File I/O error (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Remote search or rerank service unreachable (code 7)
    ServiceUnavailable = 7,

    /// Requested backend unsupported on this machine (code 8)
    UnsupportedOperation = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

impl ExitCode {
    /// `Success` when every test passed, `GeneralError` otherwise.
    pub fn from_eval(result: &EvalResult) -> Self {
        if result.all_passed() {
            ExitCode::Success
        } else {
            ExitCode::GeneralError
        }
    }

    /// Maps an error to the code scripts can branch on.
    pub fn from_error(error: &NornicError) -> Self {
        use crate::eval::EvalError;
        use crate::gpu::GpuError;

        match error {
            NornicError::Gpu(GpuError::CudaNotAvailable) => ExitCode::UnsupportedOperation,
            NornicError::Eval(EvalError::Read { .. } | EvalError::Write { .. }) => {
                ExitCode::IoError
            }
            NornicError::Eval(EvalError::Parse { .. }) => ExitCode::ParseError,
            NornicError::Config { .. } => ExitCode::ConfigError,
            _ => match error.category() {
                ErrorCategory::Configuration => ExitCode::ConfigError,
                ErrorCategory::ExternalService => ExitCode::ServiceUnavailable,
                ErrorCategory::Resource => ExitCode::BlockingError,
                ErrorCategory::Execution | ErrorCategory::Validation => ExitCode::GeneralError,
            },
        }
    }

    /// Blocking errors should halt automation pipelines.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error or failed tests",
            ExitCode::BlockingError => "Blocking error - automation should halt",
            ExitCode::ParseError => "Parse error",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::ServiceUnavailable => "Service unavailable",
            ExitCode::UnsupportedOperation => "Unsupported operation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalError;
    use crate::vector::VectorError;
    use std::path::PathBuf;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as u8, 0);
        assert_eq!(ExitCode::GeneralError as u8, 1);
        assert_eq!(ExitCode::BlockingError as u8, 2);
        assert_eq!(ExitCode::ConfigError as u8, 6);
    }

    #[test]
    fn test_from_error() {
        let parse = NornicError::Eval(EvalError::Parse {
            path: PathBuf::from("suite.json"),
            source: serde_json::from_str::<u32>("x").unwrap_err(),
        });
        assert_eq!(ExitCode::from_error(&parse), ExitCode::ParseError);

        let dims = NornicError::Vector(VectorError::DimensionMismatch {
            expected: 3,
            actual: 2,
        });
        assert_eq!(ExitCode::from_error(&dims), ExitCode::ConfigError);

        let unreachable = NornicError::Eval(EvalError::Unreachable {
            url: "http://localhost:7474".to_string(),
            reason: "refused".to_string(),
        });
        assert_eq!(ExitCode::from_error(&unreachable), ExitCode::ServiceUnavailable);
    }

    #[test]
    fn test_is_success() {
        assert!(ExitCode::Success.is_success());
        assert!(!ExitCode::GeneralError.is_success());
        assert!(ExitCode::BlockingError.is_blocking());
        assert!(!ExitCode::Success.is_blocking());
    }
}
