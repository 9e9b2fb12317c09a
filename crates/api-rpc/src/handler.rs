//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{not_found, to_rpc_error};
use crate::types::{
    BalanceResponse, GetBalanceRequest, GetTaskRequest, HealthRequest, HealthResponse,
    ListTasksRequest, ListTasksResponse, UpdateBalanceRequest,
};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use taskwarden_core::application::{BalanceLedger, TaskService};
use taskwarden_core::domain::TaskWithHistory;
use tracing::debug;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    task_service: Arc<TaskService>,
    ledger: Arc<BalanceLedger>,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(task_service: Arc<TaskService>, ledger: Arc<BalanceLedger>) -> Self {
        Self {
            task_service,
            ledger,
            start_time: std::time::Instant::now(),
        }
    }

    /// tasks.list.v1
    pub async fn list_tasks(
        &self,
        _params: ListTasksRequest,
    ) -> Result<ListTasksResponse, ErrorObjectOwned> {
        let tasks = self.task_service.list_tasks().await.map_err(to_rpc_error)?;
        debug!(count = tasks.len(), "Listed tasks");
        Ok(ListTasksResponse { tasks })
    }

    /// tasks.get.v1
    pub async fn get_task(
        &self,
        params: GetTaskRequest,
    ) -> Result<TaskWithHistory, ErrorObjectOwned> {
        self.task_service
            .find_task(params.task_id)
            .await
            .map_err(to_rpc_error)?
            .ok_or_else(|| not_found("Task", params.task_id))
    }

    /// balance.get.v1
    pub async fn get_balance(
        &self,
        params: GetBalanceRequest,
    ) -> Result<BalanceResponse, ErrorObjectOwned> {
        self.ledger
            .find_by_id(params.user_id)
            .await
            .map_err(to_rpc_error)?
            .map(BalanceResponse::from)
            .ok_or_else(|| not_found("User", params.user_id))
    }

    /// balance.update.v1
    pub async fn update_balance(
        &self,
        params: UpdateBalanceRequest,
    ) -> Result<BalanceResponse, ErrorObjectOwned> {
        self.ledger
            .update_balance(params.user_id, params.delta)
            .await
            .map_err(to_rpc_error)?
            .map(BalanceResponse::from)
            .ok_or_else(|| not_found("User", params.user_id))
    }

    /// health.v1
    pub async fn health(&self, _params: HealthRequest) -> Result<HealthResponse, ErrorObjectOwned> {
        let identity = self.task_service.identity();
        Ok(HealthResponse {
            instance_id: identity.instance_id.clone(),
            instance_number: identity.instance_number,
            total_instances: identity.total_instances,
            active_tasks: self.task_service.active_task_count(),
            owned_task_ids: self.task_service.owned_task_ids(),
            skipped_firings: self.task_service.skipped_firings(),
            shutting_down: self.task_service.is_shutting_down(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }
}
