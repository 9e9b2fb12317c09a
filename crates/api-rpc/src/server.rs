//! JSON-RPC Server
//!
//! Serves JSON-RPC 2.0 over TCP on localhost.

use crate::handler::RpcHandler;
use crate::types::{
    GetBalanceRequest, GetTaskRequest, HealthRequest, ListTasksRequest, UpdateBalanceRequest,
};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use taskwarden_core::application::{BalanceLedger, TaskService};
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9527;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        task_service: Arc<TaskService>,
        ledger: Arc<BalanceLedger>,
    ) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(task_service, ledger)),
        }
    }

    /// Start the JSON-RPC server.
    ///
    /// Returns the bound address (useful with port 0) and the handle that
    /// stops the server.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server on TCP"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = Self::module(self.handler)?;

        info!(addr = %local_addr, "JSON-RPC server started successfully");
        Ok((local_addr, server.start(module)))
    }

    fn module(handler: Arc<RpcHandler>) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());

        let h = handler.clone();
        module
            .register_async_method("tasks.list.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: ListTasksRequest = parse_or_empty(params)?;
                    handler.list_tasks(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let h = handler.clone();
        module
            .register_async_method("tasks.get.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: GetTaskRequest = params.parse()?;
                    handler.get_task(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let h = handler.clone();
        module
            .register_async_method("balance.get.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: GetBalanceRequest = params.parse()?;
                    handler.get_balance(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let h = handler.clone();
        module
            .register_async_method("balance.update.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: UpdateBalanceRequest = params.parse()?;
                    handler.update_balance(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let h = handler;
        module
            .register_async_method("health.v1", move |params, _, _| {
                let handler = h.clone();
                async move {
                    let req: HealthRequest = parse_or_empty(params)?;
                    handler.health(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        Ok(module)
    }
}

/// Parameterless methods accept a missing params member as `{}`
fn parse_or_empty<T: serde::de::DeserializeOwned>(
    params: jsonrpsee::types::Params<'static>,
) -> Result<T, jsonrpsee::types::ErrorObjectOwned> {
    if params.as_str().is_none() {
        serde_json::from_str("{}").map_err(|e| {
            jsonrpsee::types::ErrorObjectOwned::owned(
                crate::error::code::VALIDATION_ERROR,
                e.to_string(),
                None::<()>,
            )
        })
    } else {
        params.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpsee::core::client::ClientT;
    use jsonrpsee::core::params::ObjectParams;
    use jsonrpsee::http_client::HttpClientBuilder;
    use jsonrpsee::rpc_params;
    use taskwarden_core::application::{HandlerRegistry, TaskServiceConfig};
    use taskwarden_core::domain::{InstanceIdentity, User};
    use taskwarden_core::port::lock_session::mocks::InMemoryLockBroker;
    use taskwarden_core::port::task_store::mocks::InMemoryTaskStore;
    use taskwarden_core::port::time_provider::SystemTimeProvider;
    use taskwarden_core::port::user_repository::mocks::InMemoryUserRepository;

    #[tokio::test]
    async fn test_serves_methods_over_http() {
        let store = InMemoryTaskStore::new();
        let service = Arc::new(TaskService::new(
            TaskServiceConfig::new(InstanceIdentity::standalone("served")),
            Arc::new(store.clone()),
            Arc::new(store),
            Arc::new(InMemoryLockBroker::new().session()),
            HandlerRegistry::default(),
            Arc::new(SystemTimeProvider),
        ));
        let users = InMemoryUserRepository::new();
        users
            .insert(User {
                id: 1,
                balance: 100,
                created_at: 0,
                updated_at: 0,
            })
            .await;
        let ledger = Arc::new(BalanceLedger::new(
            Arc::new(users),
            Arc::new(SystemTimeProvider),
        ));

        let config = RpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let (addr, handle) = RpcServer::new(config, service, ledger)
            .start()
            .await
            .unwrap();

        let client = HttpClientBuilder::default()
            .build(format!("http://{}", addr))
            .unwrap();

        let health: serde_json::Value = client.request("health.v1", rpc_params![]).await.unwrap();
        assert_eq!(health["instance_id"], "served");

        let mut params = ObjectParams::new();
        params.insert("user_id", 1).unwrap();
        params.insert("delta", 25).unwrap();
        let updated: serde_json::Value = client
            .request("balance.update.v1", params)
            .await
            .unwrap();
        assert_eq!(updated["balance"], 125);

        let mut params = ObjectParams::new();
        params.insert("task_id", 5).unwrap();
        let missing = client
            .request::<serde_json::Value, _>("tasks.get.v1", params)
            .await;
        tokio_test::assert_err!(missing);

        let mut params = ObjectParams::new();
        params.insert("user_id", 1).unwrap();
        let balance = tokio_test::assert_ok!(
            client
                .request::<serde_json::Value, _>("balance.get.v1", params)
                .await
        );
        assert_eq!(balance["balance"], 125);

        handle.stop().unwrap();
    }
}
