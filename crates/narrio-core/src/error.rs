//! ============================================================================
//! Error Types - Remote API and generation lifecycle failures
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::generation::InstanceState;

/// Failures reported by the remote job API client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized. Check your API key.")]
    Unauthorized,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The backend reported the task as failed; empty when it gave no reason
    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Task timed out after {0}s")]
    TimedOut(u64),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// Failures of one generation instance.
/// Each variant decides what happens to the project and its job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum GenerationError {
    #[error("Submission failed: {0}")]
    Submission(ApiError),

    #[error("Status check failed: {0}")]
    Polling(ApiError),

    #[error("Result fetch failed: {0}")]
    Result(ApiError),

    #[error("Video generation failed: {0}")]
    TaskFailed(String),

    #[error("Video generation timed out after {0}s")]
    TimedOut(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cannot {action} a generation that is {state}")]
    InvalidTransition {
        action: String,
        state: InstanceState,
    },

    #[error("Generation cannot be retried: {0}")]
    NotRetryable(String),

    #[error("Generation was cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Message shown to the user. Backend failures pass through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::TaskFailed(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Coarse category carried on terminal events
    pub fn kind(&self) -> FailureKind {
        match self {
            GenerationError::Submission(_) => FailureKind::Submission,
            GenerationError::Polling(_) => FailureKind::Polling,
            GenerationError::Result(_) => FailureKind::Result,
            GenerationError::TaskFailed(_) => FailureKind::Backend,
            GenerationError::TimedOut(_) => FailureKind::Timeout,
            GenerationError::Storage(_)
            | GenerationError::InvalidTransition { .. }
            | GenerationError::NotRetryable(_)
            | GenerationError::Cancelled => FailureKind::Local,
        }
    }

    /// Whether the remote task is known to be finished, so its job record
    /// no longer serves recovery
    pub fn ends_remote_task(&self) -> bool {
        matches!(
            self,
            GenerationError::TaskFailed(_) | GenerationError::TimedOut(_)
        )
    }
}

impl From<anyhow::Error> for GenerationError {
    fn from(e: anyhow::Error) -> Self {
        GenerationError::Storage(e.to_string())
    }
}

/// Category of a failed generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Submission,
    Polling,
    Result,
    Backend,
    Timeout,
    Local,
}
