//! Standardized error handling for the workflow engine
//!
//! Validation and admission errors are returned synchronously to callers.
//! Failures inside a running execution are recorded on the execution instead.

use autoflow_shared::ExecutionStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("workflow {0} is disabled")]
    WorkflowDisabled(Uuid),

    #[error("workflow {workflow_id} already has {running} active executions (limit {limit})")]
    ConcurrencyLimit {
        workflow_id: Uuid,
        running: usize,
        limit: u32,
    },

    #[error("execution {execution_id} is {status}, expected running")]
    InvalidState {
        execution_id: Uuid,
        status: ExecutionStatus,
    },

    #[error("action {index} ({action_type}) failed: {message}")]
    Action {
        index: usize,
        action_type: String,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn workflow_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("workflow {}", id))
    }

    pub fn execution_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("execution {}", id))
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::WorkflowDisabled(_) => "WORKFLOW_DISABLED",
            Self::ConcurrencyLimit { .. } => "CONCURRENCY_LIMIT",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Action { .. } => "ACTION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Admission was denied by policy rather than by a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyLimit { .. } | Self::WorkflowDisabled(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Serializable error envelope handed to callers of batch operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    /// Error code (e.g., "VALIDATION_ERROR", "NOT_FOUND", "CONCURRENCY_LIMIT")
    pub code: String,
    pub message: String,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ErrorReport {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl From<&EngineError> for ErrorReport {
    fn from(err: &EngineError) -> Self {
        Self::new(err.error_code(), err.to_string())
    }
}
