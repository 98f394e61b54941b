//! Core Error Types
//!
//! Errors raised by the job model and the stage crate. The application crate
//! wraps these in its own `AppError`, which adds configuration, conflict and
//! tool-outcome variants.

use thiserror::Error;

/// Core error type for the pipeline workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External process could not be started or supervised
    #[error("Command error: {0}")]
    Command(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
