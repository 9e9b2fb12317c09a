// Application Layer - Use Cases and Business Logic

pub mod grouper;
pub mod ledger;
pub mod lock_manager;
pub mod registry;
pub mod shutdown;
pub mod task_service;
pub mod trigger;

// Re-exports
pub use grouper::{group_by_schedule, select_representatives};
pub use ledger::BalanceLedger;
pub use lock_manager::LockManager;
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use task_service::{ReclaimReport, TaskService, TaskServiceConfig, TaskState};
pub use trigger::{FireCallback, RecurrenceTrigger};
