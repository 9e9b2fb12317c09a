//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use serde_json::json;
use taskwarden_core::error::{AppError, TaskError};

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INSUFFICIENT_FUNDS: i32 = 4004;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        AppError::Domain(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::InvalidState(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
        err @ AppError::InsufficientFunds {
            user_id,
            balance,
            delta,
        } => ErrorObjectOwned::owned(
            code::INSUFFICIENT_FUNDS,
            err.to_string(),
            Some(json!({ "user_id": user_id, "balance": balance, "delta": delta })),
        ),
        AppError::Database(msg) => ErrorObjectOwned::owned(code::DB_ERROR, msg, None::<()>),
        AppError::Task(TaskError::LockAcquisition(id)) => ErrorObjectOwned::owned(
            code::CONFLICT,
            TaskError::LockAcquisition(id).to_string(),
            None::<()>,
        ),
        AppError::Task(e) => {
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, e.to_string(), None::<()>)
        }
        AppError::Config(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
        AppError::Internal(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
    }
}

/// Error for a lookup that found nothing
pub fn not_found(what: &str, id: i64) -> ErrorObjectOwned {
    to_rpc_error(AppError::NotFound(format!("{} {} not found", what, id)))
}
