//! SQLite persistence for the scheduling platform.

pub mod error;
pub mod job_store;
pub mod models;
pub mod schedule_repository;

pub use error::{Result, StorageError};
pub use job_store::SqliteJobStore;
pub use schedule_repository::SqliteScheduleRepository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Open (creating if missing) a SQLite database with foreign keys on.
pub async fn create_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(StorageError::Database)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    tracing::debug!(path = %path.display(), "database pool created");
    Ok(pool)
}

/// Run the embedded migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations complete");
    Ok(())
}

/// Cheap connectivity check for readiness probes.
pub async fn check_connection(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
