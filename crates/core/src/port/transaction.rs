// Transaction port for atomic operations

use crate::domain::TaskId;
use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transactional TaskStore operations
#[async_trait]
pub trait TransactionalTaskStore: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn TaskTransaction>>;
}

/// Task writes made on behalf of one firing.
///
/// A handler error rolls these back; history rows are written outside the
/// transaction so they survive the rollback.
#[async_trait]
pub trait TaskTransaction: Transaction {
    /// Set `last_run_at` (within transaction)
    async fn touch_last_run(&mut self, task_id: TaskId, now_millis: i64) -> Result<u64>;
}
