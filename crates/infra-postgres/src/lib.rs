// Taskwarden Infrastructure - PostgreSQL Adapter
// Implements: TaskStore, TransactionalTaskStore, LockSession, UserRepository

mod connection;
mod error;
mod lock_session;
mod migration;
mod task_store;
mod transaction;
mod user_repository;

pub use connection::{connect_options, create_pool, validate_schema_name};
pub use error::{is_connection_error, map_sqlx_error};
pub use lock_session::{PgLockSession, DEFAULT_LOCK_NAMESPACE};
pub use migration::run_migrations;
pub use task_store::PgTaskStore;
pub use transaction::{PgTaskTransaction, PgUserTransaction};
pub use user_repository::PgUserRepository;

// Note: sqlx::Error conversion goes through map_sqlx_error; orphan rules
// forbid implementing From<sqlx::Error> for AppError here
