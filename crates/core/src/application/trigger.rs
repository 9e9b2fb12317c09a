//! Recurrence Trigger - cancellable cron-driven callback
//!
//! Fires a callback on every match of a schedule expression, evaluated
//! against the wall clock. Each firing runs on its own tokio task, so a slow
//! firing never delays the next tick: serializing firings of the same task
//! is the caller's job (see the overlap guard in `TaskService`).

use crate::application::shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::domain::ScheduleExpression;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback invoked on every firing
pub type FireCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to a running trigger. Dropping it stops the trigger.
pub struct RecurrenceTrigger {
    expression: ScheduleExpression,
    cancel: ShutdownSender,
    fire_count: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl RecurrenceTrigger {
    /// Start firing `on_fire` on every match of `expression`
    pub fn start(expression: ScheduleExpression, on_fire: FireCallback) -> Self {
        let (cancel, token) = shutdown_channel();
        let fire_count = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(run(
            expression.clone(),
            on_fire,
            Arc::clone(&fire_count),
            token,
        ));

        Self {
            expression,
            cancel,
            fire_count,
            handle,
        }
    }

    /// Cancel future firings. In-flight firings are not interrupted.
    pub fn stop(&self) {
        self.cancel.shutdown();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_shutdown() || self.handle.is_finished()
    }

    /// Number of firings started so far
    pub fn fire_count(&self) -> u64 {
        self.fire_count.load(Ordering::SeqCst)
    }

    pub fn expression(&self) -> &ScheduleExpression {
        &self.expression
    }
}

async fn run(
    expression: ScheduleExpression,
    on_fire: FireCallback,
    fire_count: Arc<AtomicU64>,
    mut cancel: ShutdownToken,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        if cancel.is_shutdown() {
            break;
        }

        // Never schedule at or before the previous tick, even if the wall
        // clock lags the timer a little
        let now = Utc::now();
        let from = match last_fire {
            Some(last) if last > now => last,
            _ => now,
        };
        let Some(next) = expression.next_after(from) else {
            warn!(schedule = %expression, "Schedule has no future occurrence, trigger ends");
            break;
        };

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {},
            _ = cancel.wait() => break,
        }

        if cancel.is_shutdown() {
            break;
        }

        last_fire = Some(next);
        fire_count.fetch_add(1, Ordering::SeqCst);
        debug!(schedule = %expression, at = %next, "Trigger fired");
        tokio::spawn(on_fire());
    }

    debug!(schedule = %expression, "Trigger stopped");
}
