// Reclaim loop - revalidate owned locks, recover orphans, claim free tasks

use super::guard::ExecutingGuard;
use super::{ReclaimLoop, TaskService};
use crate::application::grouper::select_representatives;
use crate::application::shutdown::{shutdown_channel, ShutdownToken};
use crate::domain::TaskId;
use crate::error::{Result, TaskError};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Outcome of one reclaim cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    /// Owned locks confirmed still held
    pub revalidated: usize,
    /// Owned locks found lost and relinquished
    pub lost: usize,
    /// Foreign ownership rows cleared because their owner is gone
    pub orphans_cleared: usize,
    /// Tasks newly claimed this cycle
    pub claimed: usize,
}

impl TaskService {
    /// Run one reclaim cycle.
    ///
    /// 1. Revalidate every owned task not currently executing; relinquish
    ///    on loss (no history row, nothing was in flight).
    /// 2. Clear ownership rows left behind by crashed instances.
    /// 3. Claim representatives that nobody owns.
    pub async fn reclaim_once(self: &Arc<Self>) -> Result<ReclaimReport> {
        self.reclaim_cycle().instrument(self.span.clone()).await
    }

    async fn reclaim_cycle(self: &Arc<Self>) -> Result<ReclaimReport> {
        let mut report = ReclaimReport::default();

        for task_id in self.owned_task_ids() {
            let Some(claimed) = self.claimed_task(task_id) else {
                continue;
            };
            // Held until relinquish returns; a firing arriving meanwhile
            // is skipped like any overlapping fire
            let Some(_executing) = ExecutingGuard::try_acquire(&claimed.executing) else {
                debug!(task_id = %task_id, "Task executing, revalidation deferred");
                continue;
            };

            if self.lock_manager.revalidate(task_id).await {
                report.revalidated += 1;
            } else {
                warn!(
                    task_id = %task_id,
                    error = %TaskError::ReclaimCheck(task_id),
                    "Lock lost, relinquishing task"
                );
                self.relinquish(task_id).await;
                report.lost += 1;
            }
        }

        if self.is_shutting_down() {
            return Ok(report);
        }

        let tasks = self.task_store.find_all().await?;
        let mut freed: HashSet<TaskId> = HashSet::new();
        for task in tasks.iter().filter(|t| t.owner_instance_id.is_some()) {
            match self.lock_manager.clear_if_orphaned(task).await {
                Ok(true) => {
                    freed.insert(task.id);
                    report.orphans_cleared += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(task_id = %task.id, error = %e, "Orphan check failed"),
            }
        }

        for task in select_representatives(&tasks) {
            if self.is_shutting_down() {
                break;
            }
            if self.claimed_task(task.id).is_some() || self.is_retired(task.id) {
                continue;
            }
            if !task.is_unowned() && !freed.contains(&task.id) {
                continue;
            }

            match self.claim_and_schedule(&task).await {
                Ok(true) => report.claimed += 1,
                Ok(false) => {}
                Err(e) => warn!(task_id = %task.id, error = %e, "Claim during reclaim failed"),
            }
        }

        if report.lost > 0 || report.orphans_cleared > 0 || report.claimed > 0 {
            info!(
                revalidated = report.revalidated,
                lost = report.lost,
                orphans_cleared = report.orphans_cleared,
                claimed = report.claimed,
                "Reclaim cycle finished"
            );
        } else {
            debug!(revalidated = report.revalidated, "Reclaim cycle finished");
        }
        Ok(report)
    }

    pub(super) fn spawn_reclaim_loop(self: &Arc<Self>) {
        let (cancel, token) = shutdown_channel();
        let handle = tokio::spawn(
            run_reclaim_loop(Arc::downgrade(self), self.config.reclaim_interval, token)
                .instrument(self.span.clone()),
        );
        *self.lock(&self.reclaim_loop) = Some(ReclaimLoop { cancel, handle });
    }
}

/// Periodic reclaim. Holds the service weakly so a dropped service ends it.
async fn run_reclaim_loop(
    service: Weak<TaskService>,
    interval: Duration,
    mut cancel: ShutdownToken,
) {
    info!(interval_ms = interval.as_millis() as u64, "Reclaim loop started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = cancel.wait() => break,
        }
        if cancel.is_shutdown() {
            break;
        }

        let Some(service) = service.upgrade() else {
            break;
        };
        if let Err(e) = service.reclaim_once().await {
            // Next cycle retries
            error!(error = %e, "Reclaim cycle failed");
        }
    }
    info!("Reclaim loop stopped");
}
