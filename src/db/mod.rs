use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

pub mod store;

use crate::error::HookError;
pub use store::SqlJobStore;

/// Open (creating if needed) the SQLite job archive and run migrations
pub async fn init_db(db_path: impl AsRef<Path>) -> Result<SqlitePool, HookError> {
    let db_path = db_path.as_ref();

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            HookError::Database(format!("Failed to create database directory: {}", e))
        })?;
    }

    info!("Opening job archive at {}", db_path.display());
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| HookError::Database(format!("Failed to connect to database: {}", e)))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| HookError::Database(format!("Failed to run migrations: {}", e)))?;

    Ok(pool)
}
