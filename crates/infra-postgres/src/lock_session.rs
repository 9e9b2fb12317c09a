// Dedicated advisory-lock session
//
// Advisory locks belong to the backend session that took them, so this
// adapter owns exactly one connection outside the pool. All lock calls are
// serialized on it.

use crate::error::{is_connection_error, map_sqlx_error};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use taskwarden_core::domain::TaskId;
use taskwarden_core::error::{AppError, Result};
use taskwarden_core::port::LockSession;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Default first key of the two-key advisory lock form
pub const DEFAULT_LOCK_NAMESPACE: i32 = 1_952_543_595;

/// PostgreSQL implementation of LockSession using
/// `pg_try_advisory_lock(namespace, task_id)`.
pub struct PgLockSession {
    options: PgConnectOptions,
    namespace: i32,
    conn: Mutex<Option<PgConnection>>,
    /// Hold count per key, as this session believes it
    held: StdMutex<HashMap<TaskId, u32>>,
}

impl PgLockSession {
    /// Open the session eagerly so an unreachable database fails at boot
    pub async fn connect(options: PgConnectOptions, namespace: i32) -> Result<Self> {
        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(map_sqlx_error)?;
        info!(namespace = namespace, "Lock session connected");
        Ok(Self {
            options,
            namespace,
            conn: Mutex::new(Some(conn)),
            held: StdMutex::new(HashMap::new()),
        })
    }

    pub fn namespace(&self) -> i32 {
        self.namespace
    }

    /// Close the connection; the server drops every lock it still holds
    pub async fn close(&self) {
        let conn = self.conn.lock().await.take();
        self.held_map().clear();
        if let Some(conn) = conn {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close lock session cleanly");
            }
        }
    }

    fn lock_key(task_id: TaskId) -> Result<i32> {
        i32::try_from(task_id).map_err(|_| {
            AppError::Validation(format!(
                "Task id {} does not fit a 32-bit advisory lock key",
                task_id
            ))
        })
    }

    fn held_map(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, u32>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<PgConnection>,
    ) -> Result<&'a mut PgConnection> {
        if slot.is_none() {
            let conn = PgConnection::connect_with(&self.options)
                .await
                .map_err(map_sqlx_error)?;
            info!(namespace = self.namespace, "Lock session reconnected");
            *slot = Some(conn);
        }
        slot.as_mut()
            .ok_or_else(|| AppError::Internal("lock session connection missing".to_string()))
    }

    /// Map a query error; a lost connection marks the session broken and
    /// forgets every held key, since the server released them.
    fn on_error(&self, slot: &mut Option<PgConnection>, err: sqlx::Error) -> AppError {
        if is_connection_error(&err) {
            slot.take();
            let lost = {
                let mut held = self.held_map();
                let lost = held.len();
                held.clear();
                lost
            };
            warn!(error = %err, lost_keys = lost, "Lock session connection lost");
        }
        map_sqlx_error(err)
    }
}

#[async_trait]
impl LockSession for PgLockSession {
    async fn try_lock(&self, key: TaskId) -> Result<bool> {
        let lock_key = Self::lock_key(key)?;
        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;

        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1, $2)")
            .bind(self.namespace)
            .bind(lock_key)
            .fetch_one(&mut *conn)
            .await;
        let acquired = match acquired {
            Ok(acquired) => acquired,
            Err(e) => return Err(self.on_error(&mut slot, e)),
        };

        if acquired {
            *self.held_map().entry(key).or_insert(0) += 1;
        }
        Ok(acquired)
    }

    async fn unlock(&self, key: TaskId) -> Result<bool> {
        let lock_key = Self::lock_key(key)?;
        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;

        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1, $2)")
            .bind(self.namespace)
            .bind(lock_key)
            .fetch_one(&mut *conn)
            .await;
        let released = match released {
            Ok(released) => released,
            Err(e) => return Err(self.on_error(&mut slot, e)),
        };

        let mut held = self.held_map();
        if released {
            if let Some(count) = held.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    held.remove(&key);
                }
            }
        } else {
            held.remove(&key);
        }
        Ok(released)
    }

    async fn unlock_all(&self) -> Result<()> {
        let mut slot = self.conn.lock().await;
        let Some(conn) = slot.as_mut() else {
            // No connection, no session, no locks
            self.held_map().clear();
            return Ok(());
        };

        let result = sqlx::query("SELECT pg_advisory_unlock_all()")
            .execute(&mut *conn)
            .await;
        if let Err(e) = result {
            return Err(self.on_error(&mut slot, e));
        }
        self.held_map().clear();
        Ok(())
    }

    async fn is_locked_anywhere(&self, key: TaskId) -> Result<bool> {
        let lock_key = Self::lock_key(key)?;
        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;

        // Two-key advisory locks show up with objsubid = 2
        let locked = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_locks
                WHERE locktype = 'advisory'
                  AND database = (SELECT oid FROM pg_database WHERE datname = current_database())
                  AND classid = $1::oid
                  AND objid = $2::oid
                  AND objsubid = 2
                  AND granted
            )
            "#,
        )
        .bind(self.namespace)
        .bind(lock_key)
        .fetch_one(&mut *conn)
        .await;

        match locked {
            Ok(locked) => Ok(locked),
            Err(e) => Err(self.on_error(&mut slot, e)),
        }
    }

    fn holds(&self, key: TaskId) -> bool {
        self.held_map().contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_range() {
        assert_eq!(PgLockSession::lock_key(42).unwrap(), 42);
        assert_eq!(PgLockSession::lock_key(i32::MAX as i64).unwrap(), i32::MAX);
        assert!(matches!(
            PgLockSession::lock_key(i32::MAX as i64 + 1),
            Err(AppError::Validation(_))
        ));
    }
}
