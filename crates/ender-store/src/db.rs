//! SQLite pool construction and schema migration

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

/// Catalogue schema. Child tables cascade on server deletion;
/// `servers.template_id` restricts template deletion while referenced.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS templates (
    id TEXT NOT NULL PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    minecraft_version TEXT NOT NULL DEFAULT '',
    java_version TEXT NOT NULL DEFAULT '',
    server_type TEXT NOT NULL DEFAULT '',
    min_memory_mb INTEGER NOT NULL DEFAULT 1024,
    max_memory_mb INTEGER NOT NULL DEFAULT 2048,
    tags_json TEXT NOT NULL DEFAULT '[]',
    jvm_args_json TEXT NOT NULL DEFAULT '[]',
    properties_json TEXT NOT NULL DEFAULT '{}',
    archive_path TEXT,
    startup_command TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS servers (
    id TEXT NOT NULL PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    port INTEGER NOT NULL DEFAULT 0,
    minecraft_version TEXT NOT NULL DEFAULT '',
    java_version TEXT NOT NULL DEFAULT '',
    players_current INTEGER NOT NULL DEFAULT 0,
    players_max INTEGER NOT NULL DEFAULT 20,
    cpu_usage REAL NOT NULL DEFAULT 0,
    ram_usage REAL NOT NULL DEFAULT 0,
    storage_usage INTEGER NOT NULL DEFAULT 0,
    ip_address TEXT NOT NULL DEFAULT '',
    modpack_name TEXT,
    modpack_version TEXT,
    docker_container_id TEXT NOT NULL DEFAULT '',
    data_path TEXT NOT NULL DEFAULT '',
    template_id TEXT REFERENCES templates(id) ON DELETE RESTRICT,
    rcon_password TEXT NOT NULL DEFAULT '',
    max_memory_mb INTEGER NOT NULL DEFAULT 1024,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT NOT NULL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backups (
    id TEXT NOT NULL PRIMARY KEY,
    server_id TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id TEXT NOT NULL PRIMARY KEY,
    type TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    server_id TEXT REFERENCES servers(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedules (
    id TEXT NOT NULL PRIMARY KEY,
    server_id TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    task_type TEXT NOT NULL,
    payload_json TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    next_run_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS resource_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    cpu_usage REAL NOT NULL DEFAULT 0,
    ram_usage REAL NOT NULL DEFAULT 0,
    players_current INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_resource_history_server
    ON resource_history(server_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_created
    ON events(created_at);
CREATE INDEX IF NOT EXISTS idx_schedules_active
    ON schedules(is_active, next_run_at);
"#;

/// Open (creating if missing) the catalogue database at `path` with foreign
/// keys enforced.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open an in-memory catalogue for tests. A single connection keeps every
/// query on the same in-memory database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(sqlx::Error::from)?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Apply the embedded schema.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::debug!("catalogue schema applied");
    Ok(())
}

/// Encode a timestamp for storage. One fixed RFC 3339 format keeps string
/// comparison and `strftime` grouping consistent across every table.
pub(crate) fn encode_ts(t: chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Decode a stored timestamp.
pub(crate) fn decode_ts(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&chrono::Utc))
        .map_err(|e| crate::StoreError::Invalid(format!("bad timestamp '{s}': {e}")))
}

/// Decode an optional stored timestamp.
pub(crate) fn decode_ts_opt(
    s: Option<String>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    s.as_deref().map(decode_ts).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_creates_tables() {
        let pool = connect_in_memory().await.unwrap();
        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&pool)
                .await
                .unwrap();

        for expected in [
            "servers",
            "templates",
            "users",
            "backups",
            "events",
            "schedules",
            "resource_history",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
    }
}
