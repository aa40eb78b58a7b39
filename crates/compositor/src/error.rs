use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::GraphError;

#[derive(Debug, Error)]
pub enum CompositorError {
    /// Rejected before any probing or process work starts.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A source needed a real duration and the probe could not supply one.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("{message}")]
    Process {
        message: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Filter graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Media engine not found: {0}")]
    EngineNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CompositorResult<T> = Result<T, CompositorError>;

impl CompositorError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CompositorError::InvalidRequest(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        CompositorError::PreconditionFailed(message.into())
    }

    /// Captured engine stderr, when the failure came from the external process.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CompositorError::Process { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Boundary-shaped failure: `{message, stdout?, stderr?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionFailure {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl From<&CompositorError> for CompositionFailure {
    fn from(err: &CompositorError) -> Self {
        match err {
            CompositorError::Process { message, stdout, stderr, .. } => Self {
                message: message.clone(),
                stdout: Some(stdout.clone()),
                stderr: Some(stderr.clone()),
            },
            other => Self {
                message: other.to_string(),
                stdout: None,
                stderr: None,
            },
        }
    }
}

impl From<CompositorError> for CompositionFailure {
    fn from(err: CompositorError) -> Self {
        CompositionFailure::from(&err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSuccess {
    pub output_path: PathBuf,
}

/// All-or-nothing outcome of one composition request.
pub type CompositionResult = Result<CompositionSuccess, CompositionFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_failure_keeps_captured_output() {
        let err = CompositorError::Process {
            message: "ffmpeg exited with code 1".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "Invalid filtergraph".to_string(),
        };
        assert_eq!(err.stderr(), Some("Invalid filtergraph"));

        let failure = CompositionFailure::from(&err);
        assert_eq!(failure.message, "ffmpeg exited with code 1");
        assert_eq!(failure.stderr.as_deref(), Some("Invalid filtergraph"));
    }

    #[test]
    fn non_process_failure_has_no_streams() {
        let failure = CompositionFailure::from(CompositorError::invalid("need 2 files"));
        assert_eq!(failure.message, "Invalid request: need 2 files");
        assert!(failure.stdout.is_none());

        let json = serde_json::to_value(&failure).unwrap();
        assert!(json.get("stderr").is_none());
    }
}
