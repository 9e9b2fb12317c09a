// Per-firing guards: overlap flag and panic isolation

use super::constants::UNKNOWN_PANIC_MESSAGE;
use crate::port::{HandlerError, JobContext, JobHandler};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

/// Holds a task's "already executing" flag for the duration of one firing.
///
/// Acquisition fails if the flag is already set; dropping the guard clears
/// it, whatever path the firing took.
pub(super) struct ExecutingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ExecutingGuard<'a> {
    pub(super) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Run the handler on its own tokio task so a panic surfaces as
/// `HandlerError::Panicked` instead of unwinding through the service.
pub(super) async fn run_isolated(
    handler: Arc<dyn JobHandler>,
    ctx: JobContext,
) -> Result<(), HandlerError> {
    let task_id = ctx.task_id;
    match tokio::spawn(async move { handler.run(&ctx).await }).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            error!(task_id = %task_id, panic_msg = %message, "Job handler panicked");
            Err(HandlerError::Panicked(message))
        }
        Err(join_err) => Err(HandlerError::Panicked(join_err.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        UNKNOWN_PANIC_MESSAGE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobKind;
    use crate::port::job_handler::mocks::MockJobHandler;

    fn ctx() -> JobContext {
        JobContext {
            task_id: 7,
            task_name: "seven".to_string(),
            job_kind: JobKind::new("noop"),
            instance_id: "instance-a".to_string(),
            fired_at: 0,
        }
    }

    #[test]
    fn test_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = ExecutingGuard::try_acquire(&flag);
        assert!(guard.is_some());
        assert!(ExecutingGuard::try_acquire(&flag).is_none());

        drop(guard);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(ExecutingGuard::try_acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn test_panic_becomes_handler_error() {
        let handler = Arc::new(MockJobHandler::new_panic_inducing("kaboom"));
        let result = run_isolated(handler, ctx()).await;
        assert_eq!(result, Err(HandlerError::Panicked("kaboom".to_string())));
    }

    #[tokio::test]
    async fn test_failure_passes_through() {
        let handler = Arc::new(MockJobHandler::new_fail("boom"));
        let result = run_isolated(handler, ctx()).await;
        assert_eq!(result, Err(HandlerError::failed("boom")));
    }

    #[test]
    fn test_unknown_payload() {
        assert_eq!(panic_message(Box::new(42_u8)), UNKNOWN_PANIC_MESSAGE);
    }
}
