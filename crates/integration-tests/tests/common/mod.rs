//! Shared PostgreSQL fixtures
//!
//! Every test gets its own schema and its own advisory lock namespace, so
//! tests can run in parallel against one database.

#![allow(dead_code)]

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use taskwarden_core::application::{HandlerRegistry, TaskService, TaskServiceConfig};
use taskwarden_core::domain::{InstanceIdentity, TaskId};
use taskwarden_core::port::time_provider::SystemTimeProvider;
use taskwarden_core::port::TimeProvider;
use taskwarden_infra_postgres::{
    connect_options, create_pool, run_migrations, PgLockSession, PgTaskStore,
};

pub const DATABASE_URL_VAR: &str = "TASKWARDEN_TEST_DATABASE_URL";
pub const YEARLY: &str = "0 0 1 1 *";
pub const EVERY_SECOND: &str = "* * * * * *";

pub struct TestDb {
    pub url: String,
    pub schema: String,
    pub namespace: i32,
    pub pool: PgPool,
}

impl TestDb {
    /// Migrated schema of its own, or `None` (with a notice) when no test
    /// database is configured.
    pub async fn setup(test_name: &str) -> Option<Self> {
        let Ok(url) = std::env::var(DATABASE_URL_VAR) else {
            println!("⏭️  {}: {} not set, skipping", test_name, DATABASE_URL_VAR);
            return None;
        };

        let id = uuid::Uuid::new_v4();
        let schema = format!("tw_test_{}", &id.simple().to_string()[..12]);
        // Positive and distinct from the production default
        let namespace = (id.as_u128() as u32 & 0x3fff_ffff) as i32 + 1;

        let pool = create_pool(&url, 5, Some(&schema)).await.unwrap();
        run_migrations(&pool).await.unwrap();

        Some(Self {
            url,
            schema,
            namespace,
            pool,
        })
    }

    /// Replace the seeded tasks with the given (name, schedule, kind) rows
    pub async fn replace_tasks(&self, tasks: &[(&str, &str, &str)]) -> Vec<TaskId> {
        sqlx::query("DELETE FROM tasks")
            .execute(&self.pool)
            .await
            .unwrap();

        let mut ids = Vec::new();
        for (name, schedule, kind) in tasks {
            let id: TaskId = sqlx::query_scalar(
                r#"
                INSERT INTO tasks (name, schedule_expression, job_kind, created_at, updated_at)
                VALUES ($1, $2, $3, 0, 0)
                RETURNING id
                "#,
            )
            .bind(name)
            .bind(schedule)
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .unwrap();
            ids.push(id);
        }
        ids
    }

    pub async fn lock_session(&self) -> Arc<PgLockSession> {
        Arc::new(
            PgLockSession::connect(connect_options(&self.url).unwrap(), self.namespace)
                .await
                .unwrap(),
        )
    }

    pub fn store(&self) -> Arc<PgTaskStore> {
        let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        Arc::new(PgTaskStore::new(self.pool.clone(), time_provider))
    }

    /// A service over this schema with its own dedicated lock session
    pub async fn instance(
        &self,
        instance_id: &str,
        registry: HandlerRegistry,
    ) -> (Arc<TaskService>, Arc<PgLockSession>) {
        let session = self.lock_session().await;
        let store = self.store();
        let config = TaskServiceConfig::new(InstanceIdentity::standalone(instance_id))
            .with_reclaim_interval(Duration::from_secs(3600));
        let service = Arc::new(TaskService::new(
            config,
            store.clone(),
            store,
            session.clone(),
            registry,
            Arc::new(SystemTimeProvider),
        ));
        (service, session)
    }

    pub async fn owner_of(&self, task_id: TaskId) -> Option<String> {
        sqlx::query_scalar("SELECT owner_instance_id FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn teardown(self) {
        self.pool.close().await;
        let pool = create_pool(&self.url, 1, None).await.unwrap();
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    }
}

/// Poll `check` every 100ms until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
