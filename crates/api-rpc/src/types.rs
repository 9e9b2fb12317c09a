//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use serde::{Deserialize, Serialize};
use taskwarden_core::domain::{TaskId, TaskWithHistory, User, UserId};

/// tasks.list.v1 - Every task with its latest history entry
#[derive(Debug, Deserialize)]
pub struct ListTasksRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<TaskWithHistory>,
}

/// tasks.get.v1 - One task with its latest history entry
#[derive(Debug, Deserialize)]
pub struct GetTaskRequest {
    pub task_id: TaskId,
}

/// balance.get.v1 - Read a user's balance
#[derive(Debug, Deserialize)]
pub struct GetBalanceRequest {
    pub user_id: UserId,
}

/// balance.update.v1 - Apply a signed delta in minor units
#[derive(Debug, Deserialize)]
pub struct UpdateBalanceRequest {
    pub user_id: UserId,
    pub delta: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: i64,
    pub updated_at: i64,
}

impl From<User> for BalanceResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            balance: user.balance,
            updated_at: user.updated_at,
        }
    }
}

/// health.v1 - Liveness and ownership summary of this instance
#[derive(Debug, Deserialize)]
pub struct HealthRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub instance_id: String,
    pub instance_number: u32,
    pub total_instances: u32,
    pub active_tasks: usize,
    pub owned_task_ids: Vec<TaskId>,
    pub skipped_firings: u64,
    pub shutting_down: bool,
    pub uptime_seconds: u64,
}
