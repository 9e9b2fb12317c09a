// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_handler;
pub mod lock_session;
pub mod task_store;
pub mod time_provider;
pub mod transaction;
pub mod user_repository;

// Re-exports
pub use id_provider::IdProvider;
pub use job_handler::{HandlerError, JobContext, JobHandler};
pub use lock_session::LockSession;
pub use task_store::TaskStore;
pub use time_provider::TimeProvider;
pub use transaction::{TaskTransaction, Transaction, TransactionalTaskStore};
pub use user_repository::{UserRepository, UserTransaction};
