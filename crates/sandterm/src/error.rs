//! Error types shared by the controller, configuration surface and worker hosts.
//!
//! Errors carry a stable [`ErrorCode`] so hosts can branch on the failure class
//! without parsing messages, a human-readable message, and optional structured
//! context that ends up in `crash` results via [`SandtermError::to_error_info`].

use crate::model::ErrorInfo;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type SandtermResult<T> = Result<T, SandtermError>;

/// Stable error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Filesystem, pipe or process I/O failed.
    #[serde(rename = "E_IO")]
    Io,
    /// Configuration could not be parsed or an attribute is unknown.
    #[serde(rename = "E_CONFIG")]
    Config,
    /// The sandboxed program or its worker failed unexpectedly.
    #[serde(rename = "E_WORKER")]
    Worker,
    /// Controller bookkeeping is inconsistent (e.g. poisoned lock).
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Io => "E_IO",
            Self::Config => "E_CONFIG",
            Self::Worker => "E_WORKER",
            Self::Internal => "E_INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coded error with optional structured context.
#[derive(Debug, Error, Diagnostic)]
#[error("{code}: {message}")]
pub struct SandtermError {
    /// Failure class.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Extra machine-readable detail.
    pub context: Option<Value>,
}

impl SandtermError {
    pub fn new(code: ErrorCode, message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Io,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn config(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Config, message, context)
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Worker, message, None)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, None)
    }

    /// Normalize into the serializable description carried by `crash` results.
    ///
    /// The message is never empty.
    pub fn to_error_info(&self) -> ErrorInfo {
        let message = if self.message.trim().is_empty() {
            "unknown error".to_string()
        } else {
            self.message.clone()
        };
        ErrorInfo {
            code: self.code.as_str().to_string(),
            message,
            context: self.context.clone(),
        }
    }
}

/// Failure reported by a worker host's `start` future.
///
/// Cancellation is a distinct variant so the controller never has to inspect
/// messages to tell "stopped" apart from "broken".
#[derive(Debug, Error, Diagnostic)]
pub enum WorkerError {
    /// The worker was killed before the program finished.
    #[error("worker was killed")]
    #[diagnostic(code(sandterm::worker::killed))]
    Killed,
    /// The worker failed for any other reason.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Crashed(#[from] SandtermError),
}

impl WorkerError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Killed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_info_never_has_empty_message() {
        let err = SandtermError::worker("   ");
        let info = err.to_error_info();
        assert_eq!(info.code, "E_WORKER");
        assert_eq!(info.message, "unknown error");
    }

    #[test]
    fn io_error_records_source() {
        let err = SandtermError::io("failed to read", "boom");
        assert_eq!(err.code, ErrorCode::Io);
        assert_eq!(err.to_string(), "E_IO: failed to read");
        let context = err.context.unwrap_or_default();
        assert_eq!(context["source"], "boom");
    }

    #[test]
    fn killed_is_the_only_cancellation() {
        assert!(WorkerError::Killed.is_cancellation());
        assert!(!WorkerError::from(SandtermError::worker("trap")).is_cancellation());
    }
}
