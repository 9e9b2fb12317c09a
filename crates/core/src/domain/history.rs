// Task History Domain Model (append-only audit trail)

use crate::domain::error::{DomainError, Result};
use crate::domain::TaskId;
use serde::{Deserialize, Serialize};

/// History row ID (database serial)
pub type HistoryId = i64;

/// History Status
///
/// `Running` is the only non-terminal status. A row never changes once it
/// reached `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Running,
    Completed,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Running => "running",
            HistoryStatus::Completed => "completed",
            HistoryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, HistoryStatus::Running)
    }
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HistoryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(HistoryStatus::Running),
            "completed" => Ok(HistoryStatus::Completed),
            "failed" => Ok(HistoryStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// History row that has not been persisted yet
#[derive(Debug, Clone)]
pub struct NewTaskHistory {
    pub task_id: TaskId,
    pub instance_id: String,
    pub status: HistoryStatus,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub error: Option<String>,
}

impl NewTaskHistory {
    /// Row opened when a firing enters EXECUTING
    pub fn running(task_id: TaskId, instance_id: impl Into<String>, started_at: i64) -> Self {
        Self {
            task_id,
            instance_id: instance_id.into(),
            status: HistoryStatus::Running,
            started_at,
            finished_at: None,
            error: None,
        }
    }

    /// Row for a firing that failed before its handler ran
    pub fn failed(
        task_id: TaskId,
        instance_id: impl Into<String>,
        at: i64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            instance_id: instance_id.into(),
            status: HistoryStatus::Failed,
            started_at: at,
            finished_at: Some(at),
            error: Some(error.into()),
        }
    }
}

/// Persisted history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistory {
    pub id: HistoryId,
    pub task_id: TaskId,
    pub instance_id: String,
    pub status: HistoryStatus,
    pub started_at: i64,          // epoch ms
    pub finished_at: Option<i64>, // set once terminal
    pub error: Option<String>,
}

impl TaskHistory {
    /// Transition to Completed with explicit timestamp
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        self.finish(HistoryStatus::Completed, now_millis, None)
    }

    /// Transition to Failed with explicit timestamp and error text
    pub fn fail(&mut self, now_millis: i64, error: impl Into<String>) -> Result<()> {
        self.finish(HistoryStatus::Failed, now_millis, Some(error.into()))
    }

    fn finish(&mut self, status: HistoryStatus, now_millis: i64, error: Option<String>) -> Result<()> {
        if self.status.is_terminal() || !status.is_terminal() {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.finished_at = Some(now_millis);
        self.error = error;
        Ok(())
    }
}
