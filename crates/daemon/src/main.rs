//! Taskwarden - Main Entry Point
//!
//! Boots one instance of the scheduler fleet and runs it until SIGINT or
//! SIGTERM.

mod jobs;
mod logging;
mod settings;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use settings::Settings;
use taskwarden_api_rpc::RpcServer;
use taskwarden_core::application::{BalanceLedger, TaskService};
use taskwarden_core::port::time_provider::SystemTimeProvider;
use taskwarden_core::port::TimeProvider;
use taskwarden_infra_postgres::{
    connect_options, create_pool, run_migrations, PgLockSession, PgTaskStore, PgUserRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let settings = Settings::load();
    logging::init(settings.as_ref().map(|s| s.log_format).unwrap_or_default())?;
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Configuration error");
            return Err(e);
        }
    };

    info!(
        version = taskwarden_core::VERSION,
        instance_id = %settings.instance_id,
        instance_number = settings.instance_number,
        total_instances = settings.total_instances,
        "Taskwarden starting..."
    );

    if let Err(e) = run(settings).await {
        error!(error = %format!("{:#}", e), "Taskwarden stopped with an error");
        return Err(e);
    }
    Ok(())
}

async fn run(settings: Settings) -> Result<()> {
    // 2. Database
    let pool = create_pool(
        &settings.database_url,
        settings.database_max_connections,
        None,
    )
    .await
    .context("DB pool creation failed")?;
    if settings.run_migrations {
        run_migrations(&pool).await.context("Migration failed")?;
    }

    // 3. Dedicated advisory-lock session, outside the pool
    let lock_session = Arc::new(
        PgLockSession::connect(
            connect_options(&settings.database_url)?,
            settings.lock_namespace,
        )
        .await
        .context("Lock session connection failed")?,
    );

    // 4. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let task_store = Arc::new(PgTaskStore::new(pool.clone(), time_provider.clone()));
    let registry = jobs::default_registry()?;

    let service = Arc::new(TaskService::new(
        settings.task_service_config(),
        task_store.clone(),
        task_store,
        lock_session.clone(),
        registry,
        time_provider.clone(),
    ));
    let ledger = Arc::new(BalanceLedger::new(
        Arc::new(PgUserRepository::new(pool.clone())),
        time_provider,
    ));

    // 5. Claim and schedule
    if let Err(e) = service.start().await {
        service.shutdown().await;
        lock_session.close().await;
        return Err(e).context("Task service failed to start");
    }

    // 6. JSON-RPC server
    let rpc = RpcServer::new(settings.rpc_config(), service.clone(), ledger)
        .start()
        .await;
    let (rpc_addr, rpc_handle) = match rpc {
        Ok(started) => started,
        Err(e) => {
            service.shutdown().await;
            lock_session.close().await;
            return Err(anyhow::anyhow!("RPC server start failed: {}", e));
        }
    };

    info!(
        rpc_addr = %rpc_addr,
        active_tasks = service.active_task_count(),
        "System ready"
    );

    // 7. Wait for shutdown signal
    wait_for_signal().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: triggers and locks first, then the surface
    service.shutdown().await;
    if let Err(e) = rpc_handle.stop() {
        error!(error = %e, "RPC server stop failed");
    }
    rpc_handle.stopped().await;
    lock_session.close().await;
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}
