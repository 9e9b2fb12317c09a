//! Built-in job handlers for the seeded task kinds

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use taskwarden_core::application::HandlerRegistry;
use taskwarden_core::port::{HandlerError, JobContext, JobHandler};
use tracing::info;

/// Job kinds created by the seed migration
pub const SEEDED_JOB_KINDS: &[&str] = &[
    "thirty_second_task",
    "minute_task",
    "two_minute_task",
    "five_minute_task",
    "ten_minute_task",
    "quarter_hour_task",
    "half_hour_task",
    "hourly_task",
    "two_hour_task",
    "four_hour_task",
    "daily_task",
    "weekly_task",
    "monthly_task",
];

/// Handler that records the firing in the log and succeeds
pub struct LogJobHandler;

#[async_trait]
impl JobHandler for LogJobHandler {
    async fn run(&self, ctx: &JobContext) -> Result<(), HandlerError> {
        info!(
            task_id = ctx.task_id,
            task_name = %ctx.task_name,
            job_kind = %ctx.job_kind,
            fired_at = ctx.fired_at,
            "Executing scheduled job"
        );
        Ok(())
    }
}

pub fn default_registry() -> Result<HandlerRegistry> {
    let handler: Arc<dyn JobHandler> = Arc::new(LogJobHandler);
    let mut builder = HandlerRegistry::builder();
    for kind in SEEDED_JOB_KINDS {
        builder = builder.register(*kind, Arc::clone(&handler))?;
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwarden_core::domain::JobKind;

    #[test]
    fn test_registry_covers_seeded_kinds() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.kinds().len(), SEEDED_JOB_KINDS.len());
        assert!(registry.contains(&JobKind::new("weekly_task")));
        assert!(registry.resolve(&JobKind::new("unknown_task")).is_err());
    }

    #[tokio::test]
    async fn test_log_handler_succeeds() {
        let ctx = JobContext {
            task_id: 1,
            task_name: "minute".to_string(),
            job_kind: JobKind::new("minute_task"),
            instance_id: "local".to_string(),
            fired_at: 0,
        };
        tokio_test::assert_ok!(LogJobHandler.run(&ctx).await);
    }
}
