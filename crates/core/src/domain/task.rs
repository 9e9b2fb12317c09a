// Task Domain Model

use crate::domain::history::TaskHistory;
use serde::{Deserialize, Serialize};

/// Task ID (database serial)
pub type TaskId = i64;

/// Symbolic name of the work a task performs, resolved through the
/// handler registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recurring job definition.
///
/// Rows are provisioned externally and never deleted here. Ownership
/// fields (`is_running`, `owner_instance_id`, `started_at`) are written only
/// by the lock manager; `last_run_at` only by the execution protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub schedule_expression: String,
    pub job_kind: JobKind,

    // Best-effort ownership flag, reconciled by the reclaim loop
    pub is_running: bool,
    pub owner_instance_id: Option<String>,
    pub started_at: Option<i64>, // epoch ms
    pub last_run_at: Option<i64>, // epoch ms

    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Create an unowned task with explicit timestamps
    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        schedule_expression: impl Into<String>,
        job_kind: JobKind,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            schedule_expression: schedule_expression.into(),
            job_kind,
            is_running: false,
            owner_instance_id: None,
            started_at: None,
            last_run_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn is_owned_by(&self, instance_id: &str) -> bool {
        self.owner_instance_id.as_deref() == Some(instance_id)
    }

    pub fn is_unowned(&self) -> bool {
        self.owner_instance_id.is_none()
    }
}

/// A task with its single most recent history entry embedded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWithHistory {
    #[serde(flatten)]
    pub task: Task,
    pub latest_history: Option<TaskHistory>,
}
