//! Append-only event log access

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::{decode_ts, encode_ts};
use crate::error::Result;
use crate::models::{Event, EventLevel};

fn scan_event(row: &SqliteRow) -> Result<Event> {
    let level: String = row.try_get("level")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Event {
        id: row.try_get("id")?,
        kind: row.try_get("type")?,
        level: level.parse()?,
        message: row.try_get("message")?,
        server_id: row.try_get("server_id")?,
        created_at: decode_ts(&created_at)?,
    })
}

/// Access to the `events` table. Rows are only ever inserted.
#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        kind: &str,
        level: EventLevel,
        message: &str,
        server_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (id, type, level, message, server_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(kind)
        .bind(level.to_string())
        .bind(message)
        .bind(server_id)
        .bind(encode_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT id, type, level, message, server_id, created_at FROM events \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(scan_event).collect()
    }
}
