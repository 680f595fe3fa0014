//! Errors - error types and their classification.
//!
//! - `TaskError`: raised by a task's execute / poll operation. Workers turn it
//!   into a Failed result and apply the retry budget.
//! - `FlowError`: step-execution, aggregation and collaborator failures.
//!   These are never retried by the engine.
//! - `StoreError`, `LockError`: failures of the persistence / lock ports.

use thiserror::Error;

use super::ids::FlowId;
use super::result::TaskResultStatus;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task execution failed: {0}")]
    Execution(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("task worker crashed: {0}")]
    Crashed(String),
}

impl TaskError {
    pub fn execution(message: impl Into<String>) -> Self {
        TaskError::Execution(message.into())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("flow {0} is locked by another runner")]
    Held(FlowId),

    #[error("lock service failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("no such flow: {0}")]
    NoSuchFlow(FlowId),

    /// Raised by step logic itself (not by a task worker).
    #[error("step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    /// The most severe task result was an error and nothing handled it.
    #[error("{status} result with no matching transition: {message}")]
    Aggregation {
        status: TaskResultStatus,
        message: String,
        cause: Option<String>,
    },

    #[error("invalid flow state: {0}")]
    InvalidState(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl FlowError {
    pub fn step_execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Error detail kept on the flow record for operators.
    pub fn cause(&self) -> Option<&str> {
        match self {
            FlowError::Aggregation { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }
}
