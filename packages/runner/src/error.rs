// ABOUTME: Error types for staging and sandbox execution
// ABOUTME: Separates pre-flight file errors from container runtime failures

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::providers::ProviderError;

/// Failures detected before any sandbox exists
#[derive(Error, Debug)]
pub enum StageError {
    /// A declared script, manifest or input path does not exist
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A declared path exists but is a directory or other non-regular file
    #[error("Not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// The staging directory could not be created or populated
    #[error("Failed to stage {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    /// Path the error refers to
    pub fn path(&self) -> &PathBuf {
        match self {
            StageError::FileNotFound(path) | StageError::NotAFile(path) => path,
            StageError::Io { path, .. } => path,
        }
    }
}

/// Failures of the sandbox itself, as opposed to the payload it ran
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The container runtime could not be reached or could not honor a request
    #[error("Sandbox unavailable: {cause}")]
    Unavailable {
        cause: String,
        /// Logs collected before the runtime failed, if any
        logs: Option<String>,
    },

    /// The sandbox exceeded its time limit and was torn down
    #[error("Sandbox timed out after {limit:?}")]
    Timeout { limit: Duration, logs: String },

    /// The run was interrupted on the host and the sandbox was torn down
    #[error("Sandbox run interrupted")]
    Interrupted { logs: String },
}

impl SandboxError {
    pub fn unavailable(cause: impl Into<String>) -> Self {
        SandboxError::Unavailable {
            cause: cause.into(),
            logs: None,
        }
    }

    pub fn logs(&self) -> Option<&str> {
        match self {
            SandboxError::Unavailable { logs, .. } => logs.as_deref(),
            SandboxError::Timeout { logs, .. } | SandboxError::Interrupted { logs } => Some(logs),
        }
    }
}

impl From<ProviderError> for SandboxError {
    fn from(err: ProviderError) -> Self {
        SandboxError::unavailable(err.to_string())
    }
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
