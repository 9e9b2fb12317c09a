// sqlx::Error -> AppError with the SQLSTATE classified

use taskwarden_core::error::AppError;

// PostgreSQL error codes: https://www.postgresql.org/docs/current/errcodes-appendix.html
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const ADMIN_SHUTDOWN: &str = "57P01";
const CRASH_SHUTDOWN: &str = "57P02";
const CANNOT_CONNECT_NOW: &str = "57P03";
const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Convert sqlx::Error to AppError with structured information
pub fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let Some(code) = db_err.code() else {
                return AppError::Database(format!("Database error: {}", db_err.message()));
            };
            let code_str = code.as_ref();
            match code_str {
                UNIQUE_VIOLATION => AppError::Database(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code_str
                )),
                FOREIGN_KEY_VIOLATION => AppError::Database(format!(
                    "Foreign key constraint violation: {} ({})",
                    db_err.message(),
                    code_str
                )),
                CHECK_VIOLATION => AppError::Validation(format!(
                    "Check constraint violation: {} ({})",
                    db_err.message(),
                    code_str
                )),
                SERIALIZATION_FAILURE | DEADLOCK_DETECTED => AppError::Database(format!(
                    "Transaction conflict: {} ({})",
                    db_err.message(),
                    code_str
                )),
                c if is_connection_sqlstate(c) => AppError::Database(format!(
                    "Connection lost: {} ({})",
                    db_err.message(),
                    code_str
                )),
                _ => AppError::Database(format!(
                    "Database error [{}]: {}",
                    code_str,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        sqlx::Error::PoolTimedOut => {
            AppError::Database("Timed out waiting for a pooled connection".to_string())
        }
        _ if is_connection_error(&err) => AppError::Database(format!("Connection lost: {}", err)),
        _ => AppError::Database(err.to_string()),
    }
}

/// Whether the error means the connection (and so its session) is gone
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| is_connection_sqlstate(code.as_ref()))
            .unwrap_or(false),
        _ => false,
    }
}

fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with(CONNECTION_EXCEPTION_CLASS)
        || matches!(code, ADMIN_SHUTDOWN | CRASH_SHUTDOWN | CANNOT_CONNECT_NOW)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_sqlstates() {
        assert!(is_connection_sqlstate("57P01"));
        assert!(is_connection_sqlstate("08006"));
        assert!(is_connection_sqlstate("08003"));
        assert!(!is_connection_sqlstate("23505"));
        assert!(!is_connection_sqlstate("40001"));
    }

    #[test]
    fn test_io_error_is_connection_error() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert!(is_connection_error(&err));
        assert!(matches!(map_sqlx_error(err), AppError::Database(msg) if msg.starts_with("Connection lost")));
    }

    #[test]
    fn test_row_not_found() {
        assert!(!is_connection_error(&sqlx::Error::RowNotFound));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            AppError::Database(_)
        ));
    }
}
