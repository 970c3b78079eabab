//! Database layer for Practicum Admin
//!
//! Manages the SQLite connection pool and embedded migrations, and exposes the
//! entity store the core services read and write through.

pub mod models;
pub mod store;

pub use store::{EntityStore, SqliteStore};

use crate::config::StorageConfig;
use crate::error::{AdminError, AdminResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
    pub busy_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&StorageConfig> for DatabaseOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            enable_wal: true,
            busy_timeout: Duration::from_secs(config.busy_timeout_secs),
        }
    }
}

/// Create a SQLite connection pool for the configured database file
pub async fn create_pool(config: &StorageConfig) -> AdminResult<SqlitePool> {
    let path = config.database.as_path();
    let options = DatabaseOptions::from(config);

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            AdminError::Internal(format!(
                "Failed to create data directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(if options.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        })
        .foreign_keys(true)
        .busy_timeout(options.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::debug!("Opened database at {}", path.display());

    Ok(pool)
}

/// Create a migrated in-memory database.
///
/// The pool holds exactly one connection that never expires, since every
/// `:memory:` connection would otherwise see its own empty database.
pub async fn create_memory_pool() -> AdminResult<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> AdminResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AdminError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> AdminResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}
