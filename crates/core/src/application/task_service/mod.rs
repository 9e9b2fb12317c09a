//! Task Service - per-instance orchestrator
//!
//! Composes the lock manager, grouper, registry and recurrence triggers into
//! the per-task state machine:
//!
//! ```text
//! UNCLAIMED -> CLAIMED_IDLE <-> EXECUTING
//!      ^            |               |
//!      +------------+---------------+   (loss, failure, shutdown)
//! ```
//!
//! All per-instance state lives on the service value, so any number of
//! instances can run side by side in one process.

pub mod constants;
mod execution;
mod guard;
mod reclaim;


pub use reclaim::ReclaimReport;

use crate::application::grouper::select_representatives;
use crate::application::lock_manager::LockManager;
use crate::application::registry::HandlerRegistry;
use crate::application::shutdown::ShutdownSender;
use crate::application::trigger::{FireCallback, RecurrenceTrigger};
use crate::domain::{InstanceIdentity, ScheduleExpression, Task, TaskId, TaskWithHistory};
use crate::error::{AppError, Result, TaskError};
use crate::port::{JobHandler, LockSession, TaskStore, TimeProvider, TransactionalTaskStore};
use constants::{DEFAULT_RECLAIM_INTERVAL, MIN_RECLAIM_INTERVAL};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Task service configuration
#[derive(Debug, Clone)]
pub struct TaskServiceConfig {
    pub identity: InstanceIdentity,
    pub reclaim_interval: Duration,
}

impl TaskServiceConfig {
    pub fn new(identity: InstanceIdentity) -> Self {
        Self {
            identity,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
        }
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity.instance_id.trim().is_empty() {
            return Err(AppError::Config("instance id must not be empty".to_string()));
        }
        if self.reclaim_interval < MIN_RECLAIM_INTERVAL {
            return Err(AppError::Config(format!(
                "reclaim interval must be at least {}ms",
                MIN_RECLAIM_INTERVAL.as_millis()
            )));
        }
        Ok(())
    }
}

/// Per-task state as seen by this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Unclaimed,
    ClaimedIdle,
    Executing,
}

/// A task this instance owns and schedules
pub(crate) struct ClaimedTask {
    task: Task,
    handler: Arc<dyn JobHandler>,
    trigger: RecurrenceTrigger,
    executing: AtomicBool,
}

impl ClaimedTask {
    fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }
}

struct ReclaimLoop {
    cancel: ShutdownSender,
    handle: JoinHandle<()>,
}

/// Orchestrator for one instance
pub struct TaskService {
    config: TaskServiceConfig,
    task_store: Arc<dyn TaskStore>,
    tx_store: Arc<dyn TransactionalTaskStore>,
    lock_manager: LockManager,
    registry: HandlerRegistry,
    time_provider: Arc<dyn TimeProvider>,
    claimed: Mutex<HashMap<TaskId, Arc<ClaimedTask>>>,
    /// Tasks whose handler failed; not claimed again by this instance
    retired: Mutex<HashSet<TaskId>>,
    reclaim_loop: Mutex<Option<ReclaimLoop>>,
    shutting_down: AtomicBool,
    skipped_firings: AtomicU64,
    span: Span,
}

impl TaskService {
    pub fn new(
        config: TaskServiceConfig,
        task_store: Arc<dyn TaskStore>,
        tx_store: Arc<dyn TransactionalTaskStore>,
        lock_session: Arc<dyn LockSession>,
        registry: HandlerRegistry,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let identity = &config.identity;
        let span = info_span!(
            "instance",
            instance_id = %identity.instance_id,
            instance_number = identity.instance_number,
            total_instances = identity.total_instances,
        );
        let lock_manager = LockManager::new(
            identity.instance_id.clone(),
            lock_session,
            Arc::clone(&task_store),
            Arc::clone(&time_provider),
        );

        Self {
            config,
            task_store,
            tx_store,
            lock_manager,
            registry,
            time_provider,
            claimed: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashSet::new()),
            reclaim_loop: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            skipped_firings: AtomicU64::new(0),
            span,
        }
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.config.identity
    }

    fn instance_id(&self) -> &str {
        &self.config.identity.instance_id
    }

    /// Load every task, claim and schedule the representatives, and start
    /// the reclaim loop.
    ///
    /// A store failure here is a `StartupFailure`; per-task claim failures
    /// are logged and leave that task unscheduled.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.start_inner().instrument(self.span.clone()).await
    }

    async fn start_inner(self: &Arc<Self>) -> Result<()> {
        self.config.validate()?;

        if self.is_shutting_down() {
            return Err(AppError::InvalidState("service is shut down".to_string()));
        }
        if self.lock(&self.reclaim_loop).is_some() {
            return Err(AppError::InvalidState("service already started".to_string()));
        }

        let tasks = self
            .task_store
            .find_all()
            .await
            .map_err(|e| TaskError::Startup(e.to_string()))?;
        let representatives = select_representatives(&tasks);
        info!(
            tasks = tasks.len(),
            representatives = representatives.len(),
            "Loaded tasks"
        );

        let mut claimed = 0;
        for task in &representatives {
            match self.claim_and_schedule(task).await {
                Ok(true) => claimed += 1,
                Ok(false) => {}
                Err(e) => error!(task_id = %task.id, error = %e, "Failed to claim task"),
            }
        }

        self.spawn_reclaim_loop();
        info!(
            claimed = claimed,
            reclaim_interval_ms = self.config.reclaim_interval.as_millis() as u64,
            "Task service started"
        );
        Ok(())
    }

    /// Stop the reclaim loop, stop every trigger, then release every lock.
    ///
    /// Best effort: errors are logged, never returned. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown_inner().instrument(self.span.clone()).await
    }

    async fn shutdown_inner(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down task service");

        let reclaim_loop = self.lock(&self.reclaim_loop).take();
        if let Some(reclaim_loop) = reclaim_loop {
            reclaim_loop.cancel.shutdown();
            if let Err(e) = reclaim_loop.handle.await {
                error!(error = %e, "Reclaim loop ended abnormally");
            }
        }

        // Triggers first: no firing may start after the locks are gone
        let drained: Vec<Arc<ClaimedTask>> =
            self.lock(&self.claimed).drain().map(|(_, c)| c).collect();
        for claimed in &drained {
            claimed.trigger.stop();
        }

        match self.lock_manager.release_all().await {
            Ok(cleared) => info!(
                stopped_triggers = drained.len(),
                cleared_rows = cleared,
                "Task service stopped"
            ),
            Err(e) => error!(error = %e, "Failed to release locks on shutdown"),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn state_of(&self, task_id: TaskId) -> TaskState {
        match self.lock(&self.claimed).get(&task_id) {
            Some(claimed) if claimed.is_executing() => TaskState::Executing,
            Some(_) => TaskState::ClaimedIdle,
            None => TaskState::Unclaimed,
        }
    }

    pub fn active_task_count(&self) -> usize {
        self.lock(&self.claimed).len()
    }

    /// Ids of the tasks this instance schedules, ascending
    pub fn owned_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock(&self.claimed).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Overlapping firings skipped so far
    pub fn skipped_firings(&self) -> u64 {
        self.skipped_firings.load(Ordering::SeqCst)
    }

    /// Every task with its most recent history entry
    pub async fn list_tasks(&self) -> Result<Vec<TaskWithHistory>> {
        self.task_store.list_with_latest_history().await
    }

    pub async fn find_task(&self, id: TaskId) -> Result<Option<TaskWithHistory>> {
        self.task_store.find_with_latest_history(id).await
    }

    /// UNCLAIMED -> CLAIMED_IDLE.
    ///
    /// Resolves schedule and handler before touching the lock, so a bad row
    /// is reported once and never claimed. Returns whether the task is now
    /// scheduled here.
    pub(crate) async fn claim_and_schedule(self: &Arc<Self>, task: &Task) -> Result<bool> {
        if self.lock(&self.claimed).contains_key(&task.id) {
            return Ok(true);
        }

        let schedule = match ScheduleExpression::parse(&task.schedule_expression) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Task has an invalid schedule, not claiming");
                return Ok(false);
            }
        };
        let handler = match self.registry.resolve(&task.job_kind) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Task has no handler, not claiming");
                return Ok(false);
            }
        };

        if !self.lock_manager.claim(task.id).await? {
            debug!(error = %TaskError::LockAcquisition(task.id), "Task left unscheduled");
            return Ok(false);
        }

        let trigger = RecurrenceTrigger::start(schedule, self.fire_callback(task.id));
        let claimed = Arc::new(ClaimedTask {
            task: task.clone(),
            handler,
            trigger,
            executing: AtomicBool::new(false),
        });
        self.lock(&self.claimed).insert(task.id, claimed);

        info!(
            task_id = %task.id,
            task_name = %task.name,
            schedule = %task.schedule_expression,
            "Task scheduled"
        );
        Ok(true)
    }

    /// Any state -> UNCLAIMED: stop the trigger, clear ownership, unlock.
    pub(crate) async fn relinquish(&self, task_id: TaskId) {
        let removed = self.lock(&self.claimed).remove(&task_id);
        if let Some(claimed) = &removed {
            claimed.trigger.stop();
        }

        if let Err(e) = self.lock_manager.release(task_id).await {
            error!(task_id = %task_id, error = %e, "Failed to release task");
        }
        info!(task_id = %task_id, "Task unclaimed");
    }

    fn fire_callback(self: &Arc<Self>, task_id: TaskId) -> FireCallback {
        let service = Arc::downgrade(self);
        Arc::new(move || {
            let service = service.clone();
            Box::pin(async move {
                if let Some(service) = service.upgrade() {
                    service.fire(task_id).await;
                }
            })
        })
    }

    fn retire(&self, task_id: TaskId) {
        self.lock(&self.retired).insert(task_id);
    }

    fn is_retired(&self, task_id: TaskId) -> bool {
        self.lock(&self.retired).contains(&task_id)
    }

    fn claimed_task(&self, task_id: TaskId) -> Option<Arc<ClaimedTask>> {
        self.lock(&self.claimed).get(&task_id).cloned()
    }

    /// Lock a state mutex, recovering from poisoning
    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TaskService {
    fn drop(&mut self) {
        if !self.is_shutting_down() && !self.lock(&self.claimed).is_empty() {
            warn!(
                instance_id = %self.instance_id(),
                "Task service dropped without shutdown; locks stay until the session ends"
            );
        }
    }
}
