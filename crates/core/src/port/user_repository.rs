// User Repository Port (balance ledger collaborator)

use crate::domain::{User, UserId};
use crate::error::Result;
use crate::port::transaction::Transaction;
use async_trait::async_trait;

/// Repository interface for User persistence
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find user by ID (no row lock)
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;

    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn UserTransaction>>;
}

/// User operations within a transaction
#[async_trait]
pub trait UserTransaction: Transaction {
    /// Row-locking read; the lock is held until commit or rollback
    async fn find_by_id_for_update(&mut self, id: UserId) -> Result<Option<User>>;

    /// Overwrite the balance of a row locked by this transaction
    async fn set_balance(&mut self, id: UserId, balance: i64, now_millis: i64) -> Result<User>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard};

    type UserTable = HashMap<UserId, User>;

    /// In-memory user table.
    ///
    /// A transaction's `find_by_id_for_update` locks the whole table until
    /// it ends, which is coarser than a row lock but gives the same
    /// serialization for single-user tests.
    #[derive(Clone, Default)]
    pub struct InMemoryUserRepository {
        users: Arc<Mutex<UserTable>>,
    }

    impl InMemoryUserRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, user: User) {
            self.users.lock().await.insert(user.id, user);
        }
    }

    #[async_trait]
    impl UserRepository for InMemoryUserRepository {
        async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
            Ok(self.users.lock().await.get(&id).cloned())
        }

        async fn begin_transaction(&self) -> Result<Box<dyn UserTransaction>> {
            Ok(Box::new(InMemoryUserTransaction {
                users: Arc::clone(&self.users),
                guard: None,
                staged: HashMap::new(),
            }))
        }
    }

    pub struct InMemoryUserTransaction {
        users: Arc<Mutex<UserTable>>,
        guard: Option<OwnedMutexGuard<UserTable>>,
        staged: UserTable,
    }

    #[async_trait]
    impl Transaction for InMemoryUserTransaction {
        async fn commit(mut self: Box<Self>) -> Result<()> {
            if let Some(mut guard) = self.guard.take() {
                for (id, user) in self.staged.drain() {
                    guard.insert(id, user);
                }
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl UserTransaction for InMemoryUserTransaction {
        async fn find_by_id_for_update(&mut self, id: UserId) -> Result<Option<User>> {
            if self.guard.is_none() {
                self.guard = Some(Arc::clone(&self.users).lock_owned().await);
            }
            if let Some(user) = self.staged.get(&id) {
                return Ok(Some(user.clone()));
            }
            Ok(self.guard.as_ref().and_then(|g| g.get(&id).cloned()))
        }

        async fn set_balance(&mut self, id: UserId, balance: i64, now_millis: i64) -> Result<User> {
            let mut user = self
                .find_by_id_for_update(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;
            user.balance = balance;
            user.updated_at = now_millis;
            self.staged.insert(id, user.clone());
            Ok(user)
        }
    }
}
