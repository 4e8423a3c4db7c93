//! Backup catalogue access

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::{decode_ts, encode_ts};
use crate::error::{Result, StoreError};
use crate::models::Backup;

fn scan_backup(row: &SqliteRow) -> Result<Backup> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Backup {
        id: row.try_get("id")?,
        server_id: row.try_get("server_id")?,
        name: row.try_get("name")?,
        size: row.try_get("size")?,
        created_at: decode_ts(&created_at)?,
        path: row.try_get("path")?,
    })
}

/// Access to the `backups` table.
#[derive(Clone)]
pub struct BackupStore {
    pool: SqlitePool,
}

impl BackupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_for_server(&self, server_id: &str) -> Result<Vec<Backup>> {
        let rows = sqlx::query(
            "SELECT id, server_id, name, path, size, created_at FROM backups \
             WHERE server_id = ? ORDER BY created_at DESC",
        )
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(scan_backup).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Backup> {
        let row = sqlx::query(
            "SELECT id, server_id, name, path, size, created_at FROM backups WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("backup", id))?;
        scan_backup(&row)
    }

    pub async fn insert(&self, backup: &Backup) -> Result<()> {
        sqlx::query(
            "INSERT INTO backups (id, server_id, name, path, size, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&backup.id)
        .bind(&backup.server_id)
        .bind(&backup.name)
        .bind(&backup.path)
        .bind(backup.size)
        .bind(encode_ts(backup.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM backups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("backup", id));
        }
        Ok(())
    }
}
