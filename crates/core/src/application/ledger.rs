// Balance Ledger - transactional balance updates with a non-negativity rule

use crate::domain::{User, UserId};
use crate::error::{AppError, Result};
use crate::port::{TimeProvider, UserRepository, UserTransaction};
use std::sync::Arc;
use tracing::{info, warn};

/// Balance ledger service
pub struct BalanceLedger {
    users: Arc<dyn UserRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl BalanceLedger {
    pub fn new(users: Arc<dyn UserRepository>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            users,
            time_provider,
        }
    }

    pub async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        self.users.find_by_id(id).await
    }

    /// Row-locking read inside the caller's transaction
    pub async fn find_by_id_for_update(
        &self,
        id: UserId,
        txn: &mut dyn UserTransaction,
    ) -> Result<Option<User>> {
        txn.find_by_id_for_update(id).await
    }

    /// Apply `delta` to the user's balance in its own transaction.
    ///
    /// Returns `Ok(None)` for an unknown user. Rejects with
    /// `InsufficientFunds` (balance unchanged) if the result would be
    /// negative.
    pub async fn update_balance(&self, id: UserId, delta: i64) -> Result<Option<User>> {
        let mut txn = self.users.begin_transaction().await?;

        let user = match self.find_by_id_for_update(id, txn.as_mut()).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                txn.rollback().await?;
                return Ok(None);
            }
            Err(e) => {
                let _ = txn.rollback().await;
                return Err(e);
            }
        };

        let Some(new_balance) = user.balance_after(delta) else {
            txn.rollback().await?;
            warn!(
                user_id = %id,
                balance = user.balance,
                delta = delta,
                "Rejected balance update: insufficient funds"
            );
            return Err(AppError::InsufficientFunds {
                user_id: id,
                balance: user.balance,
                delta,
            });
        };

        let now = self.time_provider.now_millis();
        let updated = match txn.set_balance(id, new_balance, now).await {
            Ok(updated) => updated,
            Err(e) => {
                let _ = txn.rollback().await;
                return Err(e);
            }
        };
        txn.commit().await?;

        info!(
            user_id = %id,
            delta = delta,
            balance = updated.balance,
            "Balance updated"
        );
        Ok(Some(updated))
    }
}
