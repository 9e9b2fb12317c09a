// PostgreSQL Connection Pool Setup

use crate::error::map_sqlx_error;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Executor;
use std::str::FromStr;
use std::time::Duration;
use taskwarden_core::error::{AppError, Result};
use tracing::info;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const APPLICATION_NAME: &str = "taskwarden";

/// Parse a database URL into connect options
pub fn connect_options(database_url: &str) -> Result<PgConnectOptions> {
    PgConnectOptions::from_str(database_url)
        .map(|options| options.application_name(APPLICATION_NAME))
        .map_err(|e| AppError::Config(format!("Invalid database URL: {}", e)))
}

/// Create the shared connection pool.
///
/// With `schema`, every pooled connection uses it as `search_path` and the
/// schema is created if missing (used to isolate integration tests).
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    schema: Option<&str>,
) -> Result<PgPool> {
    let options = connect_options(database_url)?;
    let mut pool_options = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT);

    if let Some(schema) = schema {
        validate_schema_name(schema)?;
        let set_path = format!("SET search_path TO {}", schema);
        pool_options = pool_options.after_connect(move |conn, _meta| {
            let set_path = set_path.clone();
            Box::pin(async move {
                conn.execute(set_path.as_str()).await?;
                Ok(())
            })
        });
    }

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)?;

    if let Some(schema) = schema {
        pool.execute(format!("CREATE SCHEMA IF NOT EXISTS {}", schema).as_str())
            .await
            .map_err(map_sqlx_error)?;
    }

    info!(max_connections = max_connections, schema = ?schema, "Database pool ready");
    Ok(pool)
}

/// Schema names are interpolated into SQL, so only plain lowercase
/// identifiers are accepted.
pub fn validate_schema_name(schema: &str) -> Result<()> {
    let mut chars = schema.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && schema.len() <= 63;
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid schema name: {:?}", schema)))
    }
}
