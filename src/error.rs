#![allow(missing_docs)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanningError>;

#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("Invalid planning context: {0}")]
    InvalidContext(String),

    #[error("Plan validation failed: {0}")]
    ValidationFailed(String),

    #[error("Plan execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Action '{0}' not found")]
    ActionNotFound(String),

    #[error("Maximum retries exceeded for action '{action}' after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        action: String,
        attempts: u32,
        last_error: String,
    },

    #[error("No steps ready to execute - possible circular dependency")]
    CircularDependency,

    #[error("Plan execution was cancelled")]
    Cancelled,

    #[error("Plan execution timed out after {0}ms")]
    Timeout(u64),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    General(String),
}

impl PlanningError {
    /// Whether this error ends the plan without counting as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors raised by the embedding generation queue.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding model error: {0}")]
    Model(String),

    #[error("Memory update failed: {0}")]
    Storage(String),
}
