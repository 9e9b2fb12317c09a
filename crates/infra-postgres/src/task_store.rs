// PostgreSQL TaskStore

use crate::error::map_sqlx_error;
use crate::transaction::PgTaskTransaction;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::sync::Arc;
use taskwarden_core::domain::{
    HistoryId, HistoryStatus, JobKind, NewTaskHistory, Task, TaskHistory, TaskId, TaskWithHistory,
};
use taskwarden_core::error::{AppError, Result};
use taskwarden_core::port::{TaskStore, TaskTransaction, TimeProvider, TransactionalTaskStore};

const TASK_COLUMNS: &str = "id, name, schedule_expression, job_kind, is_running, \
     owner_instance_id, started_at, last_run_at, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, task_id, instance_id, status, started_at, finished_at, error";

pub struct PgTaskStore {
    pool: PgPool,
    time_provider: Arc<dyn TimeProvider>,
}

impl PgTaskStore {
    pub fn new(pool: PgPool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn find_all(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks ORDER BY id",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE id = $1",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(TaskRow::into_task))
    }

    async fn find_owned_by(&self, instance_id: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE owner_instance_id = $1 ORDER BY id",
            TASK_COLUMNS
        ))
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    async fn try_set_owner(&self, id: TaskId, instance_id: &str, now_millis: i64) -> Result<u64> {
        // Single conditional write; row locking decides concurrent races
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET owner_instance_id = $2, is_running = TRUE, started_at = $3, updated_at = $3
            WHERE id = $1
              AND (owner_instance_id IS NULL OR owner_instance_id = $2)
            "#,
        )
        .bind(id)
        .bind(instance_id)
        .bind(now_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn clear_owner(&self, id: TaskId, instance_id: &str, now_millis: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET owner_instance_id = NULL, is_running = FALSE, updated_at = $3
            WHERE id = $1 AND owner_instance_id = $2
            "#,
        )
        .bind(id)
        .bind(instance_id)
        .bind(now_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn clear_all_owned_by(&self, instance_id: &str, now_millis: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET owner_instance_id = NULL, is_running = FALSE, updated_at = $2
            WHERE owner_instance_id = $1
            "#,
        )
        .bind(instance_id)
        .bind(now_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn insert_history(&self, entry: &NewTaskHistory) -> Result<TaskHistory> {
        let now = self.time_provider.now_millis();
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            r#"
            INSERT INTO task_history (
                task_id, instance_id, status, started_at, finished_at, error,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {}
            "#,
            HISTORY_COLUMNS
        ))
        .bind(entry.task_id)
        .bind(&entry.instance_id)
        .bind(entry.status.as_str())
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .bind(&entry.error)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.into_history()
    }

    async fn finish_history(
        &self,
        id: HistoryId,
        status: HistoryStatus,
        finished_at: i64,
        error: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Cannot finish history {} as {}",
                id, status
            )));
        }

        // Conditional: terminal rows are never updated again
        let result = sqlx::query(
            r#"
            UPDATE task_history
            SET status = $2, finished_at = $3, error = $4, updated_at = $3
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(finished_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM task_history WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        match current {
            None => Err(AppError::NotFound(format!("History {} not found", id))),
            Some(current) => Err(AppError::InvalidState(format!(
                "Cannot update history {} from {} to {}",
                id, current, status
            ))),
        }
    }

    async fn history_for(&self, task_id: TaskId) -> Result<Vec<TaskHistory>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {} FROM task_history WHERE task_id = $1 ORDER BY id",
            HISTORY_COLUMNS
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(HistoryRow::into_history).collect()
    }

    async fn list_with_latest_history(&self) -> Result<Vec<TaskWithHistory>> {
        let rows = sqlx::query_as::<_, TaskWithHistoryRow>(&latest_history_query(""))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(TaskWithHistoryRow::into_domain).collect()
    }

    async fn find_with_latest_history(&self, id: TaskId) -> Result<Option<TaskWithHistory>> {
        let row = sqlx::query_as::<_, TaskWithHistoryRow>(&latest_history_query("WHERE t.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(TaskWithHistoryRow::into_domain).transpose()
    }
}

#[async_trait]
impl TransactionalTaskStore for PgTaskStore {
    async fn begin_transaction(&self) -> Result<Box<dyn TaskTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PgTaskTransaction::new(tx)))
    }
}

/// Tasks joined with their most recent history row (if any)
fn latest_history_query(filter: &str) -> String {
    format!(
        r#"
        SELECT t.id, t.name, t.schedule_expression, t.job_kind, t.is_running,
               t.owner_instance_id, t.started_at, t.last_run_at, t.created_at, t.updated_at,
               h.id AS history_id, h.instance_id AS history_instance_id,
               h.status AS history_status, h.started_at AS history_started_at,
               h.finished_at AS history_finished_at, h.error AS history_error
        FROM tasks t
        LEFT JOIN LATERAL (
            SELECT id, instance_id, status, started_at, finished_at, error
            FROM task_history
            WHERE task_id = t.id
            ORDER BY id DESC
            LIMIT 1
        ) h ON TRUE
        {}
        ORDER BY t.id
        "#,
        filter
    )
}

// Row mapping

#[derive(FromRow)]
struct TaskRow {
    id: i64,
    name: String,
    schedule_expression: String,
    job_kind: String,
    is_running: bool,
    owner_instance_id: Option<String>,
    started_at: Option<i64>,
    last_run_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TaskRow {
    fn into_task(self) -> Task {
        Task {
            id: self.id,
            name: self.name,
            schedule_expression: self.schedule_expression,
            job_kind: JobKind::new(self.job_kind),
            is_running: self.is_running,
            owner_instance_id: self.owner_instance_id,
            started_at: self.started_at,
            last_run_at: self.last_run_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: i64,
    task_id: i64,
    instance_id: String,
    status: String,
    started_at: i64,
    finished_at: Option<i64>,
    error: Option<String>,
}

impl HistoryRow {
    fn into_history(self) -> Result<TaskHistory> {
        Ok(TaskHistory {
            id: self.id,
            task_id: self.task_id,
            instance_id: self.instance_id,
            status: HistoryStatus::from_str(&self.status)?,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error,
        })
    }
}

#[derive(FromRow)]
struct TaskWithHistoryRow {
    #[sqlx(flatten)]
    task: TaskRow,
    history_id: Option<i64>,
    history_instance_id: Option<String>,
    history_status: Option<String>,
    history_started_at: Option<i64>,
    history_finished_at: Option<i64>,
    history_error: Option<String>,
}

impl TaskWithHistoryRow {
    fn into_domain(self) -> Result<TaskWithHistory> {
        let task = self.task.into_task();
        let latest_history = match (
            self.history_id,
            self.history_instance_id,
            self.history_status,
            self.history_started_at,
        ) {
            (Some(id), Some(instance_id), Some(status), Some(started_at)) => Some(
                HistoryRow {
                    id,
                    task_id: task.id,
                    instance_id,
                    status,
                    started_at,
                    finished_at: self.history_finished_at,
                    error: self.history_error,
                }
                .into_history()?,
            ),
            _ => None,
        };
        Ok(TaskWithHistory {
            task,
            latest_history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_row() -> TaskRow {
        TaskRow {
            id: 3,
            name: "Hourly".to_string(),
            schedule_expression: "0 * * * *".to_string(),
            job_kind: "hourly_task".to_string(),
            is_running: false,
            owner_instance_id: None,
            started_at: None,
            last_run_at: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_task_without_history() {
        let row = TaskWithHistoryRow {
            task: task_row(),
            history_id: None,
            history_instance_id: None,
            history_status: None,
            history_started_at: None,
            history_finished_at: None,
            history_error: None,
        };
        let domain = row.into_domain().unwrap();
        assert_eq!(domain.task.id, 3);
        assert!(domain.latest_history.is_none());
    }

    #[test]
    fn test_task_with_failed_history() {
        let row = TaskWithHistoryRow {
            task: task_row(),
            history_id: Some(9),
            history_instance_id: Some("instance-a".to_string()),
            history_status: Some("failed".to_string()),
            history_started_at: Some(10),
            history_finished_at: Some(20),
            history_error: Some("boom".to_string()),
        };
        let history = row.into_domain().unwrap().latest_history.unwrap();
        assert_eq!(history.task_id, 3);
        assert_eq!(history.status, HistoryStatus::Failed);
        assert_eq!(history.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        let row = HistoryRow {
            id: 1,
            task_id: 1,
            instance_id: "a".to_string(),
            status: "exploded".to_string(),
            started_at: 0,
            finished_at: None,
            error: None,
        };
        assert!(row.into_history().is_err());
    }

    #[test]
    fn test_latest_history_query_filter() {
        assert!(latest_history_query("WHERE t.id = $1").contains("WHERE t.id = $1"));
        assert!(latest_history_query("").contains("LEFT JOIN LATERAL"));
    }
}
