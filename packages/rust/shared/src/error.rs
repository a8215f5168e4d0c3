//! Error types for wordflow.
//!
//! Library crates use [`WordflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::{EXIT_FATAL, EXIT_INPUT_MISSING, EXIT_TOOL_NOT_FOUND};

/// Top-level error type for all wordflow operations.
#[derive(Debug, thiserror::Error)]
pub enum WordflowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed data (error artifact, run id, log line).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (naming collision, invalid partition key, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A stage could not start or could not access its areas.
    #[error("stage `{stage}` failed: {message}")]
    Stage { stage: String, message: String },

    /// A stage or bootstrap tool could not be located.
    #[error("required tool not found: {program}")]
    ToolNotFound { program: String },

    /// The pipeline input area does not exist.
    #[error("input area missing: {path:?}")]
    InputMissing { path: PathBuf },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, WordflowError>;

impl WordflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a stage-level error.
    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code reported when this error ends a run.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InputMissing { .. } => EXIT_INPUT_MISSING,
            Self::ToolNotFound { .. } => EXIT_TOOL_NOT_FOUND,
            _ => EXIT_FATAL,
        }
    }
}
