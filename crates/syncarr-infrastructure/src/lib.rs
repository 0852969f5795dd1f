// SPDX-License-Identifier: GPL-3.0-or-later
pub mod millis;
pub mod repositories;
pub mod sqlite_adapters;

use anyhow::Result;
use reqwest::Client;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use syncarr_config::{AppConfig, DatabaseConfig};
use tracing::info;

pub fn http_client() -> Result<Client> {
    let client = Client::builder()
        .pool_max_idle_per_host(8)
        .timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}

/// Open the application database and bring its schema up to date.
pub async fn init_database(config: &AppConfig) -> Result<SqlitePool> {
    info!(target: "infrastructure", "initializing database");
    let db_url = normalize_sqlite_url(&config.database.url)?;
    connect(&db_url, &config.database).await
}

/// Connect a pool to `db_url` with the WAL and busy-timeout settings the scheduler relies on.
pub async fn connect(db_url: &str, database: &DatabaseConfig) -> Result<SqlitePool> {
    info!(target: "infrastructure", db_url = %db_url, "connecting to database");

    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(database.busy_timeout_secs))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(database.pool_max_size)
        .min_connections(0)
        .idle_timeout(Some(Duration::from_secs(database.idle_timeout_secs)))
        .connect_with(options)
        .await?;

    info!(target: "infrastructure", "running migrations");
    sqlx::migrate!("../../migrations").run(&pool).await?;

    info!(target: "infrastructure", "database initialized successfully");
    Ok(pool)
}

/// Turn a relative `sqlite://` file URL into an absolute one, creating its parent directory.
pub fn normalize_sqlite_url(url: &str) -> Result<String> {
    if !url.starts_with("sqlite://") || url.starts_with("sqlite://:memory:") {
        return Ok(url.to_string());
    }

    let db_path = url.trim_start_matches("sqlite://");
    let (db_path, query) = match db_path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (db_path, None),
    };
    let path = Path::new(db_path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
            info!(target: "infrastructure", path = %parent.display(), "created database directory");
        }
    }

    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    // Forward slashes work for SQLite on every platform
    let path_str = absolute_path.to_string_lossy().replace('\\', "/");
    Ok(match query {
        Some(query) => format!("sqlite://{}?{}", path_str, query),
        None => format!("sqlite://{}", path_str),
    })
}
