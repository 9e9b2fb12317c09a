// PostgreSQL Transaction Implementations

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::{FromRow, Postgres, Transaction as SqlxTransaction};
use taskwarden_core::domain::{TaskId, User, UserId};
use taskwarden_core::error::{AppError, Result};
use taskwarden_core::port::{TaskTransaction, Transaction, UserTransaction};

/// Task writes made on behalf of one firing
pub struct PgTaskTransaction {
    tx: SqlxTransaction<'static, Postgres>,
}

impl PgTaskTransaction {
    pub fn new(tx: SqlxTransaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for PgTaskTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl TaskTransaction for PgTaskTransaction {
    async fn touch_last_run(&mut self, task_id: TaskId, now_millis: i64) -> Result<u64> {
        let result = sqlx::query("UPDATE tasks SET last_run_at = $2, updated_at = $2 WHERE id = $1")
            .bind(task_id)
            .bind(now_millis)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

/// Balance ledger transaction; `FOR UPDATE` row locks last until it ends
pub struct PgUserTransaction {
    tx: SqlxTransaction<'static, Postgres>,
}

impl PgUserTransaction {
    pub fn new(tx: SqlxTransaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for PgUserTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl UserTransaction for PgUserTransaction {
    async fn find_by_id_for_update(&mut self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, balance, created_at, updated_at FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(UserRow::into_user))
    }

    async fn set_balance(&mut self, id: UserId, balance: i64, now_millis: i64) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users SET balance = $2, updated_at = $3
            WHERE id = $1
            RETURNING id, balance, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(balance)
        .bind(now_millis)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        row.map(UserRow::into_user)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))
    }
}

#[derive(FromRow)]
pub(crate) struct UserRow {
    id: i64,
    balance: i64,
    created_at: i64,
    updated_at: i64,
}

impl UserRow {
    pub(crate) fn into_user(self) -> User {
        User {
            id: self.id,
            balance: self.balance,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
