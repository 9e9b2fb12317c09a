// Execution protocol - one firing of a claimed task

use super::guard::{run_isolated, ExecutingGuard};
use super::{ClaimedTask, TaskService};
use crate::domain::{HistoryStatus, NewTaskHistory, TaskId};
use crate::error::{AppError, Result, TaskError};
use crate::port::{HandlerError, JobContext, TaskTransaction};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// How a firing ended
enum Outcome {
    Completed,
    /// Handler error, panic or failed commit: UNCLAIMED, not claimed
    /// again here
    Failed,
    /// Lock gone: UNCLAIMED, may be reclaimed later
    LockLost,
    /// Bookkeeping failed before the handler ran; ownership kept
    Aborted,
}

impl TaskService {
    /// Trigger callback: CLAIMED_IDLE -> EXECUTING -> ...
    pub(super) async fn fire(self: Arc<Self>, task_id: TaskId) {
        let span = self.span.clone();
        self.fire_inner(task_id).instrument(span).await
    }

    async fn fire_inner(self: Arc<Self>, task_id: TaskId) {
        if self.is_shutting_down() {
            debug!(task_id = %task_id, "Firing after shutdown began, skipped");
            return;
        }
        let Some(claimed) = self.claimed_task(task_id) else {
            debug!(task_id = %task_id, "Firing for a task no longer claimed, skipped");
            return;
        };

        let Some(_executing) = ExecutingGuard::try_acquire(&claimed.executing) else {
            let skipped = self.skipped_firings.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(
                task_id = %task_id,
                skipped_total = skipped,
                "Previous firing still executing, skipping overlapping fire"
            );
            return;
        };

        match self.execute(&claimed).await {
            Outcome::Completed | Outcome::Aborted => {}
            Outcome::Failed => {
                self.retire(task_id);
                self.relinquish(task_id).await;
            }
            Outcome::LockLost => self.relinquish(task_id).await,
        }
    }

    /// Verify lock -> open history -> run handler -> record outcome
    async fn execute(&self, claimed: &ClaimedTask) -> Outcome {
        let task = &claimed.task;
        let started_at = self.time_provider.now_millis();

        let txn = match self.tx_store.begin_transaction().await {
            Ok(txn) => txn,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to open firing transaction, skipping");
                return Outcome::Aborted;
            }
        };

        if !self.lock_manager.revalidate(task.id).await {
            rollback(txn, task.id).await;
            let lost = TaskError::LockLostDuringExecution(task.id);
            warn!(task_id = %task.id, error = %lost, "Lock lost before execution");
            let entry = NewTaskHistory::failed(task.id, self.instance_id(), started_at, lost.to_string());
            if let Err(e) = self.task_store.insert_history(&entry).await {
                error!(task_id = %task.id, error = %e, "Failed to record lock loss");
            }
            return Outcome::LockLost;
        }

        let history = match self
            .task_store
            .insert_history(&NewTaskHistory::running(task.id, self.instance_id(), started_at))
            .await
        {
            Ok(history) => history,
            Err(e) => {
                rollback(txn, task.id).await;
                error!(task_id = %task.id, error = %e, "Failed to open history row, skipping");
                return Outcome::Aborted;
            }
        };

        info!(task_id = %task.id, history_id = %history.id, "Executing task");
        let ctx = JobContext {
            task_id: task.id,
            task_name: task.name.clone(),
            job_kind: task.job_kind.clone(),
            instance_id: self.instance_id().to_string(),
            fired_at: started_at,
        };

        let outcome = match run_isolated(Arc::clone(&claimed.handler), ctx).await {
            Ok(()) => self.commit_firing(txn, task.id).await,
            Err(handler_err) => {
                rollback(txn, task.id).await;
                Err(TaskError::HandlerExecution(handler_err).into())
            }
        };

        let finished_at = self.time_provider.now_millis();
        match outcome {
            Ok(()) => {
                if let Err(e) = self
                    .task_store
                    .finish_history(history.id, HistoryStatus::Completed, finished_at, None)
                    .await
                {
                    error!(task_id = %task.id, error = %e, "Failed to close history row");
                }
                info!(
                    task_id = %task.id,
                    duration_ms = finished_at - started_at,
                    "Task completed"
                );
                Outcome::Completed
            }
            Err(e) => {
                let message = failure_message(&e);
                error!(task_id = %task.id, error = %message, "Task failed");
                if let Err(e) = self
                    .task_store
                    .finish_history(history.id, HistoryStatus::Failed, finished_at, Some(&message))
                    .await
                {
                    error!(task_id = %task.id, error = %e, "Failed to close history row");
                }
                Outcome::Failed
            }
        }
    }

    async fn commit_firing(&self, mut txn: Box<dyn TaskTransaction>, task_id: TaskId) -> Result<()> {
        let now = self.time_provider.now_millis();
        if let Err(e) = txn.touch_last_run(task_id, now).await {
            rollback(txn, task_id).await;
            return Err(e);
        }
        txn.commit().await
    }
}

/// Text stored in the failed history row: the handler's own message when
/// there is one.
fn failure_message(err: &AppError) -> String {
    match err {
        AppError::Task(TaskError::HandlerExecution(HandlerError::Failed(msg))) => {
            msg.clone()
        }
        AppError::Task(task_err) => task_err.to_string(),
        other => other.to_string(),
    }
}

async fn rollback(txn: Box<dyn TaskTransaction>, task_id: TaskId) {
    if let Err(e) = txn.rollback().await {
        warn!(task_id = %task_id, error = %e, "Rollback failed");
    }
}
