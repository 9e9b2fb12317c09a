// Job Handler Port
// The work behind a task's job kind. Implementations are registered once in
// the HandlerRegistry; the orchestrator never looks handlers up by free-form
// name at firing time.

use crate::domain::{JobKind, TaskId};
use async_trait::async_trait;
use thiserror::Error;

/// What a handler is told about the firing it serves
#[derive(Debug, Clone)]
pub struct JobContext {
    pub task_id: TaskId,
    pub task_name: String,
    pub job_kind: JobKind,
    pub instance_id: String,
    pub fired_at: i64, // epoch ms
}

/// Handler errors
///
/// `Failed` displays exactly the handler's message; it is what lands in the
/// failed history row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Job Handler trait
///
/// No deadline is enforced; handlers are trusted to terminate.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> Result<(), HandlerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed
        Sleep(Duration),
    }

    /// Mock Job Handler for testing
    pub struct MockJobHandler {
        behavior: Mutex<MockBehavior>,
        call_count: AtomicUsize,
        running: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    impl MockJobHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                call_count: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            }
        }
        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }
        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }
        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }
        pub fn new_slow(duration: Duration) -> Self {
            Self::new(MockBehavior::Sleep(duration))
        }
        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
        /// Highest number of overlapping runs observed
        pub fn max_concurrent(&self) -> usize {
            self.max_concurrent.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobHandler for MockJobHandler {
        async fn run(&self, _ctx: &JobContext) -> Result<(), HandlerError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(running, Ordering::SeqCst);

            let behavior = self.behavior.lock().unwrap().clone();
            let result = match behavior {
                MockBehavior::Success => Ok(()),
                MockBehavior::Fail(msg) => Err(HandlerError::Failed(msg)),
                MockBehavior::Panic(msg) => {
                    self.running.fetch_sub(1, Ordering::SeqCst);
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Sleep(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(())
                }
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}
