// Migration Runner

use crate::error::map_sqlx_error;
use sqlx::{PgConnection, PgPool};
use taskwarden_core::error::Result;
use tracing::info;

/// Session lock serializing concurrent boots against one database
const MIGRATION_LOCK_KEY: i64 = 0x7461_736b_6d69_6772;

/// Ordered migrations: (version, description, SQL)
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "Create tasks",
        include_str!("../migrations/001_create_tasks.sql"),
    ),
    (
        2,
        "Create task_history",
        include_str!("../migrations/002_create_task_history.sql"),
    ),
    (
        3,
        "Create users",
        include_str!("../migrations/003_create_users.sql"),
    ),
    (
        4,
        "Seed standard tasks",
        include_str!("../migrations/004_seed_tasks.sql"),
    ),
];

/// Run database migrations.
///
/// Safe to call from every instance at boot: the first one applies pending
/// migrations under an advisory lock, the rest find nothing to do.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");
    let mut conn = pool.acquire().await.map_err(map_sqlx_error)?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    let result = apply_pending(&mut conn).await;

    let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error);

    result?;
    unlocked?;
    info!("All migrations applied successfully");
    Ok(())
}

async fn apply_pending(conn: &mut PgConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version BIGINT PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    info!(version = current_version, "Current schema version");

    for (version, description, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }
        info!(version = version, "Applying migration {:03}: {}", version, description);
        apply_migration(conn, *version, description, sql).await?;
    }
    Ok(())
}

/// Apply a single migration file and record it, atomically
async fn apply_migration(
    conn: &mut PgConnection,
    version: i64,
    description: &str,
    sql: &str,
) -> Result<()> {
    let mut tx = sqlx::Connection::begin(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    for statement in split_statements(sql) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
    }

    sqlx::query("INSERT INTO schema_version (version, description) VALUES ($1, $2)")
        .bind(version)
        .bind(description)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}

/// Split by semicolon, dropping comment lines and empty statements
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|statement| {
            statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_statements() {
        let sql = "-- header\nCREATE TABLE a (id INT);\n\n-- note\nCREATE INDEX i ON a(id);\n";
        assert_eq!(
            split_statements(sql),
            vec!["CREATE TABLE a (id INT)", "CREATE INDEX i ON a(id)"]
        );
    }

    #[test]
    fn test_migrations_are_ordered() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|(v, _, _)| *v).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_seed_covers_standard_schedules() {
        let seed = MIGRATIONS[3].2;
        for kind in ["thirty_second_task", "minute_task", "hourly_task", "monthly_task"] {
            assert!(seed.contains(kind), "seed is missing {}", kind);
        }
        // Every statement of every file survives splitting
        for (_, _, sql) in MIGRATIONS {
            assert!(!split_statements(sql).is_empty());
        }
    }
}
