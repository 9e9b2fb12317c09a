// Domain Layer - Pure business logic and entities

pub mod error;
pub mod history;
pub mod instance;
pub mod schedule;
pub mod task;
pub mod user;

// Re-exports
pub use error::DomainError;
pub use history::{HistoryId, HistoryStatus, NewTaskHistory, TaskHistory};
pub use instance::InstanceIdentity;
pub use schedule::ScheduleExpression;
pub use task::{JobKind, Task, TaskId, TaskWithHistory};
pub use user::{User, UserId};
