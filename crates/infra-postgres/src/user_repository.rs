// PostgreSQL UserRepository

use crate::error::map_sqlx_error;
use crate::transaction::{PgUserTransaction, UserRow};
use async_trait::async_trait;
use sqlx::PgPool;
use taskwarden_core::domain::{User, UserId};
use taskwarden_core::error::Result;
use taskwarden_core::port::{UserRepository, UserTransaction};

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, balance, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(UserRow::into_user))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn UserTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PgUserTransaction::new(tx)))
    }
}
