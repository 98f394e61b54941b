//! Error Handling
//!
//! Unified error types for the application.
//! Uses thiserror for ergonomic error definitions.

use phylo_pipeline_core::CoreError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML configuration parse errors
    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Command execution errors (e.g. a tool that cannot be started)
    #[error("Command error: {0}")]
    Command(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request conflicts with the job's current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An external tool exited with a failure status
    #[error("{}", describe_tool_failure(.tool, .exit_code, .tail))]
    ToolFailure {
        tool: String,
        exit_code: Option<i32>,
        tail: String,
    },

    /// An external tool exceeded its wall-clock limit and was killed
    #[error("Timeout: {tool} exceeded its {limit_secs}s limit")]
    Timeout { tool: String, limit_secs: u64 },

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Errors raised by the workspace crates
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a tool failure error
    pub fn tool_failure(tool: impl Into<String>, exit_code: Option<i32>, tail: impl Into<String>) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            exit_code,
            tail: tail.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(tool: impl Into<String>, limit_secs: u64) -> Self {
        Self::Timeout {
            tool: tool.into(),
            limit_secs,
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

fn describe_tool_failure(tool: &str, exit_code: &Option<i32>, tail: &str) -> String {
    let status = match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };
    if tail.trim().is_empty() {
        format!("{} failed ({})", tool, status)
    } else {
        format!("{} failed ({}): {}", tool, status, tail.trim_end())
    }
}

/// Convert AppError to a string suitable for command responses
impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
