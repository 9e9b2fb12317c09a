// Lock Manager - advisory lock + ownership column reconciliation

use crate::domain::{Task, TaskId};
use crate::error::Result;
use crate::port::{LockSession, TaskStore, TimeProvider};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Couples the instance's dedicated lock session with the Task row's
/// ownership columns.
///
/// The advisory lock is the authority; the row is a best-effort mirror that
/// the reclaim loop keeps honest.
pub struct LockManager {
    instance_id: String,
    session: Arc<dyn LockSession>,
    task_store: Arc<dyn TaskStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl LockManager {
    pub fn new(
        instance_id: impl Into<String>,
        session: Arc<dyn LockSession>,
        task_store: Arc<dyn TaskStore>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            session,
            task_store,
            time_provider,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Acquire the task's lock and record ownership.
    ///
    /// Algorithm:
    /// 1. Non-blocking try-lock on the dedicated session
    /// 2. Conditional write: owner := self only if unowned or already self
    /// 3. Re-read; if the owner is not self, back out of the lock
    pub async fn claim(&self, task_id: TaskId) -> Result<bool> {
        if !self.session.try_lock(task_id).await? {
            debug!(task_id = %task_id, "Advisory lock held elsewhere");
            return Ok(false);
        }

        let now = self.time_provider.now_millis();
        let outcome = async {
            self.task_store
                .try_set_owner(task_id, &self.instance_id, now)
                .await?;
            self.task_store.find_by_id(task_id).await
        }
        .await;

        match outcome {
            Ok(Some(task)) if task.is_owned_by(&self.instance_id) => {
                info!(
                    task_id = %task_id,
                    instance_id = %self.instance_id,
                    "Claimed task"
                );
                Ok(true)
            }
            Ok(row) => {
                warn!(
                    task_id = %task_id,
                    owner = ?row.and_then(|t| t.owner_instance_id),
                    "Ownership write lost, releasing lock"
                );
                self.session.unlock(task_id).await?;
                Ok(false)
            }
            Err(e) => {
                if let Err(unlock_err) = self.session.unlock(task_id).await {
                    error!(task_id = %task_id, error = %unlock_err, "Failed to back out of lock");
                }
                Err(e)
            }
        }
    }

    /// Clear ownership (if still ours) and release the lock.
    ///
    /// Idempotent: releasing a task this instance does not own is a no-op.
    /// The row is cleared before unlocking so no other instance can win the
    /// lock while the row still names this instance.
    pub async fn release(&self, task_id: TaskId) -> Result<()> {
        let now = self.time_provider.now_millis();
        let cleared = self
            .task_store
            .clear_owner(task_id, &self.instance_id, now)
            .await;
        let unlocked = self.unlock_fully(task_id).await;

        let cleared = cleared?;
        let unlocked = unlocked?;
        debug!(
            task_id = %task_id,
            cleared_rows = cleared,
            unlocked = unlocked,
            "Released task"
        );
        Ok(())
    }

    async fn unlock_fully(&self, task_id: TaskId) -> Result<bool> {
        let mut unlocked = false;
        while self.session.holds(task_id) {
            if !self.session.unlock(task_id).await? {
                break;
            }
            unlocked = true;
        }
        Ok(unlocked)
    }

    /// Release every lock of this session and clear every row owned by this
    /// instance. Both steps run even if the first fails.
    pub async fn release_all(&self) -> Result<u64> {
        let unlock_result = self.session.unlock_all().await;
        if let Err(e) = &unlock_result {
            error!(error = %e, "Failed to release advisory locks");
        }

        let now = self.time_provider.now_millis();
        let cleared = self
            .task_store
            .clear_all_owned_by(&self.instance_id, now)
            .await?;

        unlock_result?;
        info!(
            instance_id = %self.instance_id,
            cleared_rows = cleared,
            "Released all locks"
        );
        Ok(cleared)
    }

    /// Whether the lock is still held by this session. Never touches rows.
    ///
    /// Re-attempts the try-lock; on success drops the extra hold again so
    /// the hold count stays at one. Errors count as loss.
    pub async fn revalidate(&self, task_id: TaskId) -> bool {
        if !self.session.holds(task_id) {
            return false;
        }

        match self.session.try_lock(task_id).await {
            Ok(true) => {
                if let Err(e) = self.session.unlock(task_id).await {
                    warn!(task_id = %task_id, error = %e, "Failed to drop revalidation hold");
                    return false;
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Lock revalidation failed");
                false
            }
        }
    }

    /// Clear the ownership of a row whose owner no longer holds the lock.
    ///
    /// Returns true if the row was cleared. The write is conditional on the
    /// stale owner value, so a concurrent new owner is never clobbered.
    pub async fn clear_if_orphaned(&self, task: &Task) -> Result<bool> {
        let owner = match task.owner_instance_id.as_deref() {
            Some(owner) if owner != self.instance_id => owner,
            _ => return Ok(false),
        };

        if self.session.is_locked_anywhere(task.id).await? {
            return Ok(false);
        }

        let now = self.time_provider.now_millis();
        let cleared = self.task_store.clear_owner(task.id, owner, now).await?;
        if cleared > 0 {
            warn!(
                task_id = %task.id,
                stale_owner = %owner,
                "Cleared orphaned ownership"
            );
        }
        Ok(cleared > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobKind;
    use crate::port::lock_session::mocks::{InMemoryLockBroker, InMemoryLockSession};
    use crate::port::task_store::mocks::InMemoryTaskStore;
    use crate::port::time_provider::mocks::ManualTimeProvider;

    struct Fixture {
        store: InMemoryTaskStore,
        broker: Arc<InMemoryLockBroker>,
        time: Arc<ManualTimeProvider>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = InMemoryTaskStore::with_tasks(vec![
                Task::new(1, "minute", "* * * * *", JobKind::new("minute_task"), 0),
                Task::new(2, "hourly", "0 * * * *", JobKind::new("hourly_task"), 0),
            ]);
            Self {
                store,
                broker: InMemoryLockBroker::new(),
                time: Arc::new(ManualTimeProvider::new(5_000)),
            }
        }

        fn manager(&self, instance_id: &str) -> (LockManager, Arc<InMemoryLockSession>) {
            let session = Arc::new(self.broker.session());
            let manager = LockManager::new(
                instance_id,
                session.clone(),
                Arc::new(self.store.clone()),
                self.time.clone(),
            );
            (manager, session)
        }
    }

    #[tokio::test]
    async fn test_claim_sets_ownership() {
        let fx = Fixture::new();
        let (a, _) = fx.manager("instance-a");

        assert!(a.claim(1).await.unwrap());

        let task = fx.store.task(1).unwrap();
        assert!(task.is_running);
        assert_eq!(task.owner_instance_id.as_deref(), Some("instance-a"));
        assert_eq!(task.started_at, Some(5_000));
    }

    #[tokio::test]
    async fn test_second_instance_cannot_claim() {
        let fx = Fixture::new();
        let (a, _) = fx.manager("instance-a");
        let (b, _) = fx.manager("instance-b");

        assert!(a.claim(1).await.unwrap());
        assert!(!b.claim(1).await.unwrap());
        assert_eq!(
            fx.store.task(1).unwrap().owner_instance_id.as_deref(),
            Some("instance-a")
        );
    }

    #[tokio::test]
    async fn test_claim_backs_out_when_row_owned_elsewhere() {
        let fx = Fixture::new();
        let mut task = fx.store.task(1).unwrap();
        task.owner_instance_id = Some("instance-z".to_string());
        task.is_running = true;
        fx.store.put_task(task);

        let (a, session) = fx.manager("instance-a");
        assert!(!a.claim(1).await.unwrap());
        assert!(!session.holds(1));
        assert_eq!(fx.broker.holder_of(1), None);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let fx = Fixture::new();
        let (a, session) = fx.manager("instance-a");
        let (b, _) = fx.manager("instance-b");
        assert!(a.claim(1).await.unwrap());

        // Not ours: no-op
        b.release(1).await.unwrap();
        assert!(fx.store.task(1).unwrap().is_owned_by("instance-a"));

        a.release(1).await.unwrap();
        a.release(1).await.unwrap();
        let task = fx.store.task(1).unwrap();
        assert!(task.is_unowned());
        assert!(!task.is_running);
        assert!(!session.holds(1));
        assert!(b.claim(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_all() {
        let fx = Fixture::new();
        let (a, session) = fx.manager("instance-a");
        assert!(a.claim(1).await.unwrap());
        assert!(a.claim(2).await.unwrap());

        let cleared = a.release_all().await.unwrap();
        assert_eq!(cleared, 2);
        assert!(fx.store.task(1).unwrap().is_unowned());
        assert!(fx.store.task(2).unwrap().is_unowned());
        assert!(!session.holds(1));
        assert_eq!(fx.broker.holder_of(2), None);
    }

    #[tokio::test]
    async fn test_revalidate_keeps_hold_count_at_one() {
        let fx = Fixture::new();
        let (a, session) = fx.manager("instance-a");
        assert!(a.claim(1).await.unwrap());

        for _ in 0..3 {
            assert!(a.revalidate(1).await);
        }

        // One unlock must be enough to free it
        assert!(session.unlock(1).await.unwrap());
        assert_eq!(fx.broker.holder_of(1), None);
    }

    #[tokio::test]
    async fn test_revalidate_fails_after_session_loss() {
        let fx = Fixture::new();
        let (a, session) = fx.manager("instance-a");
        assert!(a.claim(1).await.unwrap());

        session.terminate();
        assert!(!a.revalidate(1).await);
        // Reconnected session never held it
        assert!(!a.revalidate(1).await);
    }

    #[tokio::test]
    async fn test_revalidate_unclaimed_task() {
        let fx = Fixture::new();
        let (a, _) = fx.manager("instance-a");
        assert!(!a.revalidate(2).await);
    }

    #[tokio::test]
    async fn test_orphan_cleared_after_owner_crash() {
        let fx = Fixture::new();
        let (a, a_session) = fx.manager("instance-a");
        let (b, _) = fx.manager("instance-b");
        assert!(a.claim(1).await.unwrap());

        let row = fx.store.task(1).unwrap();
        assert!(!b.clear_if_orphaned(&row).await.unwrap());

        a_session.terminate();
        assert!(b.clear_if_orphaned(&row).await.unwrap());
        assert!(b.claim(1).await.unwrap());
        assert!(fx.store.task(1).unwrap().is_owned_by("instance-b"));
    }
}
