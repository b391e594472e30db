//! Embedded schema migrations.
//!
//! diesel_migrations only speaks synchronous connections, so every call opens
//! a plain `PgConnection` on the blocking pool.

use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::error::{AppError, AppResult};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Names of migrations not yet applied
pub async fn pending_migrations(database_url: &str) -> AppResult<Vec<String>> {
    with_connection(database_url, |conn| {
        let pending = conn.pending_migrations(MIGRATIONS).map_err(|e| AppError::Database {
            operation: "check pending migrations".to_string(),
            source: anyhow::anyhow!("Migration error: {}", e),
        })?;
        Ok(pending.iter().map(|m| m.name().to_string()).collect())
    })
    .await
}

/// Apply every pending migration, returning the applied versions
pub async fn run_migrations(database_url: &str) -> AppResult<Vec<String>> {
    with_connection(database_url, |conn| {
        let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|e| AppError::Database {
            operation: "run pending migrations".to_string(),
            source: anyhow::anyhow!("Migration error: {}", e),
        })?;
        Ok(applied.iter().map(|m| m.to_string()).collect())
    })
    .await
}

/// Revert the last `steps` migrations, returning the reverted versions
pub async fn revert_migrations(database_url: &str, steps: u32) -> AppResult<Vec<String>> {
    if steps == 0 {
        return Err(AppError::Validation {
            field: "rollback_steps".to_string(),
            reason: "Number of rollback steps must be greater than 0".to_string(),
        });
    }

    with_connection(database_url, move |conn| {
        let applied = conn.applied_migrations().map_err(|e| AppError::Database {
            operation: "get applied migrations".to_string(),
            source: anyhow::anyhow!("Migration error: {}", e),
        })?;

        if applied.len() < steps as usize {
            return Err(AppError::Validation {
                field: "rollback_steps".to_string(),
                reason: format!(
                    "Cannot rollback {} migrations - only {} applied migrations available",
                    steps,
                    applied.len()
                ),
            });
        }

        let mut reverted = Vec::with_capacity(steps as usize);
        for _ in 0..steps {
            let version = conn.revert_last_migration(MIGRATIONS).map_err(|e| AppError::Database {
                operation: "revert migration".to_string(),
                source: anyhow::anyhow!("Migration rollback error: {}", e),
            })?;
            reverted.push(version.to_string());
        }
        Ok(reverted)
    })
    .await
}

async fn with_connection<T, F>(database_url: &str, f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
{
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = PgConnection::establish(&database_url).map_err(|e| AppError::Database {
            operation: "establish connection for migrations".to_string(),
            source: anyhow::anyhow!("Connection error: {}", e),
        })?;
        f(&mut conn)
    })
    .await
    .map_err(|e| AppError::Internal {
        source: anyhow::Error::from(e),
    })?
}
