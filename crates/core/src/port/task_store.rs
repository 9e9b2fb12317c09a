// Task Store Port (Interface)

use crate::domain::{
    HistoryId, HistoryStatus, NewTaskHistory, Task, TaskHistory, TaskId, TaskWithHistory,
};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence for Task and TaskHistory records.
///
/// Ownership writes are conditional so that concurrent instances are
/// serialized by the database's row locking, never by the caller.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Load every task, ordered by id
    async fn find_all(&self) -> Result<Vec<Task>>;

    /// Find task by ID
    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>>;

    /// Tasks whose `owner_instance_id` equals `instance_id`
    async fn find_owned_by(&self, instance_id: &str) -> Result<Vec<Task>>;

    /// Set `owner_instance_id = instance_id, is_running = true, started_at = now`
    /// only if the row is unowned or already owned by `instance_id`.
    ///
    /// Returns the number of rows written (0 or 1).
    async fn try_set_owner(&self, id: TaskId, instance_id: &str, now_millis: i64) -> Result<u64>;

    /// Clear ownership columns only if the row is owned by `instance_id`
    async fn clear_owner(&self, id: TaskId, instance_id: &str, now_millis: i64) -> Result<u64>;

    /// Clear ownership columns of every row owned by `instance_id`
    async fn clear_all_owned_by(&self, instance_id: &str, now_millis: i64) -> Result<u64>;

    /// Append a history row
    async fn insert_history(&self, entry: &NewTaskHistory) -> Result<TaskHistory>;

    /// Move a `running` history row to a terminal status.
    ///
    /// Fails with `InvalidState` if the row is already terminal.
    async fn finish_history(
        &self,
        id: HistoryId,
        status: HistoryStatus,
        finished_at: i64,
        error: Option<&str>,
    ) -> Result<()>;

    /// History of one task, oldest first
    async fn history_for(&self, task_id: TaskId) -> Result<Vec<TaskHistory>>;

    /// Every task with its most recent history row embedded
    async fn list_with_latest_history(&self) -> Result<Vec<TaskWithHistory>>;

    /// One task with its most recent history row embedded
    async fn find_with_latest_history(&self, id: TaskId) -> Result<Option<TaskWithHistory>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::transaction::{TaskTransaction, Transaction, TransactionalTaskStore};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct StoreState {
        tasks: BTreeMap<TaskId, Task>,
        history: Vec<TaskHistory>,
        next_history_id: HistoryId,
    }

    /// In-memory TaskStore shared by every clone.
    ///
    /// Each method runs under one mutex, which plays the part of the
    /// database's row-level serialization when several services share it.
    #[derive(Clone, Default)]
    pub struct InMemoryTaskStore {
        state: Arc<Mutex<StoreState>>,
        unavailable: Arc<AtomicBool>,
    }

    impl InMemoryTaskStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_tasks(tasks: Vec<Task>) -> Self {
            let store = Self::new();
            for task in tasks {
                store.put_task(task);
            }
            store
        }

        /// Insert or replace a task row (test provisioning)
        pub fn put_task(&self, task: Task) {
            self.state.lock().unwrap().tasks.insert(task.id, task);
        }

        pub fn task(&self, id: TaskId) -> Option<Task> {
            self.state.lock().unwrap().tasks.get(&id).cloned()
        }

        pub fn all_history(&self) -> Vec<TaskHistory> {
            self.state.lock().unwrap().history.clone()
        }

        /// Make every call fail as if the database were unreachable
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn check_available(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Database("connection refused".to_string()));
            }
            Ok(())
        }

        fn latest_for(state: &StoreState, task_id: TaskId) -> Option<TaskHistory> {
            state
                .history
                .iter()
                .filter(|h| h.task_id == task_id)
                .max_by_key(|h| h.id)
                .cloned()
        }
    }

    fn clear(task: &mut Task, now_millis: i64) {
        task.is_running = false;
        task.owner_instance_id = None;
        task.updated_at = now_millis;
    }

    #[async_trait]
    impl TaskStore for InMemoryTaskStore {
        async fn find_all(&self) -> Result<Vec<Task>> {
            self.check_available()?;
            Ok(self.state.lock().unwrap().tasks.values().cloned().collect())
        }

        async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>> {
            self.check_available()?;
            Ok(self.task(id))
        }

        async fn find_owned_by(&self, instance_id: &str) -> Result<Vec<Task>> {
            self.check_available()?;
            let state = self.state.lock().unwrap();
            Ok(state
                .tasks
                .values()
                .filter(|t| t.is_owned_by(instance_id))
                .cloned()
                .collect())
        }

        async fn try_set_owner(&self, id: TaskId, instance_id: &str, now_millis: i64) -> Result<u64> {
            self.check_available()?;
            let mut state = self.state.lock().unwrap();
            match state.tasks.get_mut(&id) {
                Some(task) if task.is_unowned() || task.is_owned_by(instance_id) => {
                    task.owner_instance_id = Some(instance_id.to_string());
                    task.is_running = true;
                    task.started_at = Some(now_millis);
                    task.updated_at = now_millis;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }

        async fn clear_owner(&self, id: TaskId, instance_id: &str, now_millis: i64) -> Result<u64> {
            self.check_available()?;
            let mut state = self.state.lock().unwrap();
            match state.tasks.get_mut(&id) {
                Some(task) if task.is_owned_by(instance_id) => {
                    clear(task, now_millis);
                    Ok(1)
                }
                _ => Ok(0),
            }
        }

        async fn clear_all_owned_by(&self, instance_id: &str, now_millis: i64) -> Result<u64> {
            self.check_available()?;
            let mut state = self.state.lock().unwrap();
            let mut cleared = 0;
            for task in state.tasks.values_mut() {
                if task.is_owned_by(instance_id) {
                    clear(task, now_millis);
                    cleared += 1;
                }
            }
            Ok(cleared)
        }

        async fn insert_history(&self, entry: &NewTaskHistory) -> Result<TaskHistory> {
            self.check_available()?;
            let mut state = self.state.lock().unwrap();
            if !state.tasks.contains_key(&entry.task_id) {
                return Err(AppError::Database(format!(
                    "Foreign key constraint violation: task {}",
                    entry.task_id
                )));
            }
            state.next_history_id += 1;
            let row = TaskHistory {
                id: state.next_history_id,
                task_id: entry.task_id,
                instance_id: entry.instance_id.clone(),
                status: entry.status,
                started_at: entry.started_at,
                finished_at: entry.finished_at,
                error: entry.error.clone(),
            };
            state.history.push(row.clone());
            Ok(row)
        }

        async fn finish_history(
            &self,
            id: HistoryId,
            status: HistoryStatus,
            finished_at: i64,
            error: Option<&str>,
        ) -> Result<()> {
            self.check_available()?;
            let mut state = self.state.lock().unwrap();
            let row = state
                .history
                .iter_mut()
                .find(|h| h.id == id)
                .ok_or_else(|| AppError::NotFound(format!("History {} not found", id)))?;

            match (status, error) {
                (HistoryStatus::Failed, Some(message)) => row.fail(finished_at, message)?,
                (HistoryStatus::Failed, None) => row.fail(finished_at, "")?,
                (HistoryStatus::Completed, _) => row.complete(finished_at)?,
                (HistoryStatus::Running, _) => {
                    return Err(AppError::InvalidState(format!(
                        "Cannot finish history {} as running",
                        id
                    )))
                }
            }
            Ok(())
        }

        async fn history_for(&self, task_id: TaskId) -> Result<Vec<TaskHistory>> {
            self.check_available()?;
            let state = self.state.lock().unwrap();
            Ok(state
                .history
                .iter()
                .filter(|h| h.task_id == task_id)
                .cloned()
                .collect())
        }

        async fn list_with_latest_history(&self) -> Result<Vec<TaskWithHistory>> {
            self.check_available()?;
            let state = self.state.lock().unwrap();
            Ok(state
                .tasks
                .values()
                .map(|task| TaskWithHistory {
                    task: task.clone(),
                    latest_history: Self::latest_for(&state, task.id),
                })
                .collect())
        }

        async fn find_with_latest_history(&self, id: TaskId) -> Result<Option<TaskWithHistory>> {
            self.check_available()?;
            let state = self.state.lock().unwrap();
            Ok(state.tasks.get(&id).map(|task| TaskWithHistory {
                task: task.clone(),
                latest_history: Self::latest_for(&state, id),
            }))
        }
    }

    #[async_trait]
    impl TransactionalTaskStore for InMemoryTaskStore {
        async fn begin_transaction(&self) -> Result<Box<dyn TaskTransaction>> {
            self.check_available()?;
            Ok(Box::new(InMemoryTaskTransaction {
                store: self.clone(),
                pending_last_run: Vec::new(),
            }))
        }
    }

    /// Buffers writes until commit
    pub struct InMemoryTaskTransaction {
        store: InMemoryTaskStore,
        pending_last_run: Vec<(TaskId, i64)>,
    }

    #[async_trait]
    impl Transaction for InMemoryTaskTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            self.store.check_available()?;
            let mut state = self.store.state.lock().unwrap();
            for (task_id, at) in &self.pending_last_run {
                if let Some(task) = state.tasks.get_mut(task_id) {
                    task.last_run_at = Some(*at);
                    task.updated_at = *at;
                }
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl TaskTransaction for InMemoryTaskTransaction {
        async fn touch_last_run(&mut self, task_id: TaskId, now_millis: i64) -> Result<u64> {
            self.store.check_available()?;
            if self.store.task(task_id).is_none() {
                return Ok(0);
            }
            self.pending_last_run.push((task_id, now_millis));
            Ok(1)
        }
    }
}
