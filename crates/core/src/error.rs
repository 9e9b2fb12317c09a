// Central Error Type for the Application

use crate::domain::TaskId;
use crate::port::HandlerError;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient funds for user {user_id}: balance {balance}, delta {delta}")]
    InsufficientFunds {
        user_id: i64,
        balance: i64,
        delta: i64,
    },

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Failures scoped to a single task id.
///
/// None of these ever stop another task's trigger or the reclaim loop.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Non-fatal: the task stays unscheduled on this instance.
    #[error("Failed to acquire lock for task {0}")]
    LockAcquisition(TaskId),

    #[error("Lost lock for task {0}")]
    LockLostDuringExecution(TaskId),

    #[error("{0}")]
    HandlerExecution(#[from] HandlerError),

    #[error("Reclaim check failed for task {0}")]
    ReclaimCheck(TaskId),

    #[error("Startup failed: {0}")]
    Startup(String),
}

// Note: sqlx::Error conversion is handled in infra-postgres crate
// by converting to AppError::Database(String)
