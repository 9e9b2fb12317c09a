//! Daemon configuration, read from environment variables

use anyhow::{bail, Context, Result};
use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;
use taskwarden_api_rpc::RpcServerConfig;
use taskwarden_core::application::TaskServiceConfig;
use taskwarden_core::domain::InstanceIdentity;
use taskwarden_core::port::id_provider::UuidProvider;
use taskwarden_core::port::IdProvider;
use taskwarden_infra_postgres::DEFAULT_LOCK_NAMESPACE;

const DEFAULT_RECLAIM_INTERVAL_MS: u64 = 60_000;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9527;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub database_max_connections: u32,
    pub reclaim_interval_ms: u64,
    pub instance_id: String,
    pub instance_number: u32,
    pub total_instances: u32,
    pub lock_namespace: i32,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub log_format: LogFormat,
    pub run_migrations: bool,
}

impl Settings {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        Self::from_env(Environment::default(), &UuidProvider)
    }

    fn from_env(env: Environment, ids: &dyn IdProvider) -> Result<Self> {
        let settings: Settings = Config::builder()
            .set_default("database_max_connections", DEFAULT_MAX_CONNECTIONS)?
            .set_default("reclaim_interval_ms", DEFAULT_RECLAIM_INTERVAL_MS)?
            .set_default("instance_id", ids.generate_id())?
            .set_default("instance_number", 1)?
            .set_default("total_instances", 1)?
            .set_default("lock_namespace", DEFAULT_LOCK_NAMESPACE)?
            .set_default("rpc_host", DEFAULT_RPC_HOST)?
            .set_default("rpc_port", DEFAULT_RPC_PORT)?
            .set_default("log_format", "pretty")?
            .set_default("run_migrations", true)?
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()
            .context("Invalid configuration (is DATABASE_URL set?)")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            bail!("DATABASE_URL must not be empty");
        }
        if self.instance_id.trim().is_empty() {
            bail!("INSTANCE_ID must not be empty");
        }
        if self.total_instances == 0 {
            bail!("TOTAL_INSTANCES must be at least 1");
        }
        if self.instance_number == 0 || self.instance_number > self.total_instances {
            bail!(
                "INSTANCE_NUMBER must be between 1 and {} (got {})",
                self.total_instances,
                self.instance_number
            );
        }
        if self.database_max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        Ok(())
    }

    pub fn identity(&self) -> InstanceIdentity {
        InstanceIdentity::new(
            self.instance_id.clone(),
            self.instance_number,
            self.total_instances,
        )
    }

    pub fn task_service_config(&self) -> TaskServiceConfig {
        TaskServiceConfig::new(self.identity())
            .with_reclaim_interval(Duration::from_millis(self.reclaim_interval_ms))
    }

    pub fn rpc_config(&self) -> RpcServerConfig {
        RpcServerConfig {
            host: self.rpc_host.clone(),
            port: self.rpc_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwarden_core::port::id_provider::mocks::SequentialIdProvider;

    fn load(vars: &[(&str, &str)]) -> Result<Settings> {
        Settings::from_env(env(vars), &SequentialIdProvider::new("generated"))
    }

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let settings = load(&[("DATABASE_URL", "postgres://localhost/tw")]).unwrap();
        assert_eq!(settings.reclaim_interval_ms, 60_000);
        assert_eq!(settings.instance_number, 1);
        assert_eq!(settings.total_instances, 1);
        assert_eq!(settings.lock_namespace, DEFAULT_LOCK_NAMESPACE);
        assert_eq!(settings.rpc_port, 9527);
        assert_eq!(settings.log_format, LogFormat::Pretty);
        assert!(settings.run_migrations);
        // Generated when unset
        assert_eq!(settings.instance_id, "generated-1");
    }

    #[test]
    fn test_overrides() {
        let settings = load(&[
            ("DATABASE_URL", "postgres://db/tw"),
            ("RECLAIM_INTERVAL_MS", "5000"),
            ("INSTANCE_ID", "worker-a"),
            ("INSTANCE_NUMBER", "2"),
            ("TOTAL_INSTANCES", "3"),
            ("LOG_FORMAT", "json"),
            ("RUN_MIGRATIONS", "false"),
        ])
        .unwrap();
        assert_eq!(settings.instance_id, "worker-a");
        assert_eq!(settings.log_format, LogFormat::Json);
        assert!(!settings.run_migrations);

        let config = settings.task_service_config();
        assert_eq!(config.reclaim_interval, Duration::from_millis(5000));
        assert_eq!(config.identity.instance_number, 2);
        assert_eq!(config.identity.total_instances, 3);
    }

    #[test]
    fn test_missing_database_url() {
        assert!(load(&[]).is_err());
    }

    #[test]
    fn test_instance_number_out_of_range() {
        for (number, total) in [("0", "3"), ("4", "3")] {
            let result = load(&[
                ("DATABASE_URL", "postgres://db/tw"),
                ("INSTANCE_NUMBER", number),
                ("TOTAL_INSTANCES", total),
            ]);
            assert!(result.is_err(), "{}/{} accepted", number, total);
        }
    }
}
