//! Storage layer: SQLite schema and helpers.
//!
//! Holds DB pool setup and migration runner.

pub mod models;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    connect_with_limit(database_url, DEFAULT_MAX_CONNECTIONS).await
}

pub async fn connect_with_limit(
    database_url: &str,
    max_connections: u32,
) -> anyhow::Result<SqlitePool> {
    let url = normalize_url(database_url);
    let opts = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    // Every connection to a private in-memory database would see its own
    // empty schema, so those pools hold exactly one.
    let max = if url.contains("memory") {
        1
    } else {
        max_connections.max(1)
    };
    debug!(url = %url, max_connections = max, "opening sqlite pool");
    let pool = SqlitePoolOptions::new()
        .max_connections(max)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

/// Accepts either a `sqlite:` URL or a plain file path.
pub fn normalize_url(database_url: &str) -> String {
    if database_url.starts_with("sqlite:") {
        return database_url.to_string();
    }
    let path = std::path::PathBuf::from(database_url);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let norm = path.to_string_lossy().replace('\\', "/");
    if path.is_absolute() {
        format!("sqlite:///{}", norm.trim_start_matches('/'))
    } else {
        format!("sqlite://{}", norm)
    }
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    // Safe to run multiple times (idempotent).
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Empties the case table and restarts its id sequence. Returns how many
/// rows were removed.
pub async fn reset_cases(pool: &SqlitePool) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;
    let removed = sqlx::query("DELETE FROM clinical_cases")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM sqlite_sequence WHERE name = 'clinical_cases'")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    debug!(removed, "case table reset");
    Ok(removed)
}
