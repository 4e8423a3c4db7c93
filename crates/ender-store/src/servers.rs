//! Server catalogue access
//!
//! The lifecycle manager owns every write to the lifecycle columns (status,
//! container id, paths, ports); the reconciler only writes observed fields
//! through [`ServerStore::update_stats`], which also appends the history row
//! in the same transaction.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::{decode_ts, encode_ts};
use crate::error::{Result, StoreError};
use crate::models::{ModpackInfo, PlayerInfo, ResourceDataPoint, ResourceUsage, Server};
use crate::ServerStatus;

const SERVER_COLUMNS: &str = "id, name, status, port, minecraft_version, java_version, \
     players_current, players_max, cpu_usage, ram_usage, storage_usage, ip_address, \
     modpack_name, modpack_version, docker_container_id, data_path, template_id, \
     rcon_password, max_memory_mb, created_at";

fn scan_server(row: &SqliteRow) -> Result<Server> {
    let status: String = row.try_get("status")?;
    let modpack_name: Option<String> = row.try_get("modpack_name")?;
    let modpack_version: Option<String> = row.try_get("modpack_version")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Server {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: status.parse()?,
        port: row.try_get("port")?,
        minecraft_version: row.try_get("minecraft_version")?,
        java_version: row.try_get("java_version")?,
        players: PlayerInfo {
            current: row.try_get("players_current")?,
            max: row.try_get("players_max")?,
        },
        resources: ResourceUsage {
            cpu: row.try_get("cpu_usage")?,
            ram: row.try_get("ram_usage")?,
            storage: row.try_get("storage_usage")?,
        },
        ip_address: row.try_get("ip_address")?,
        modpack: match (modpack_name, modpack_version) {
            (Some(name), Some(version)) => Some(ModpackInfo { name, version }),
            _ => None,
        },
        template_id: row.try_get("template_id")?,
        max_memory_mb: row.try_get("max_memory_mb")?,
        created_at: decode_ts(&created_at)?,
        docker_container_id: row.try_get("docker_container_id")?,
        data_path: row.try_get("data_path")?,
        rcon_password: row.try_get("rcon_password")?,
    })
}

/// Access to the `servers` table and its `resource_history` child.
#[derive(Clone)]
pub struct ServerStore {
    pool: SqlitePool,
}

impl ServerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<Server>> {
        let rows = sqlx::query(&format!("SELECT {SERVER_COLUMNS} FROM servers"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(scan_server).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Server> {
        let row = sqlx::query(&format!("SELECT {SERVER_COLUMNS} FROM servers WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("server", id))?;
        scan_server(&row)
    }

    pub async fn insert(&self, server: &Server) -> Result<()> {
        sqlx::query(
            "INSERT INTO servers (id, name, status, port, minecraft_version, java_version, \
             players_current, players_max, cpu_usage, ram_usage, storage_usage, ip_address, \
             modpack_name, modpack_version, docker_container_id, data_path, template_id, \
             rcon_password, max_memory_mb, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&server.id)
        .bind(&server.name)
        .bind(server.status.to_string())
        .bind(server.port)
        .bind(&server.minecraft_version)
        .bind(&server.java_version)
        .bind(server.players.current)
        .bind(server.players.max)
        .bind(server.resources.cpu)
        .bind(server.resources.ram)
        .bind(server.resources.storage)
        .bind(&server.ip_address)
        .bind(server.modpack.as_ref().map(|m| m.name.clone()))
        .bind(server.modpack.as_ref().map(|m| m.version.clone()))
        .bind(&server.docker_container_id)
        .bind(&server.data_path)
        .bind(&server.template_id)
        .bind(&server.rcon_password)
        .bind(server.max_memory_mb)
        .bind(encode_ts(server.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update descriptive fields only; lifecycle and observed fields have
    /// their own narrower write paths.
    pub async fn update_descriptive(
        &self,
        id: &str,
        name: &str,
        minecraft_version: &str,
        java_version: &str,
        players_max: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE servers SET name = ?, minecraft_version = ?, java_version = ?, \
             players_max = ? WHERE id = ?",
        )
        .bind(name)
        .bind(minecraft_version)
        .bind(java_version)
        .bind(players_max)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("server", id));
        }
        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: ServerStatus) -> Result<()> {
        sqlx::query("UPDATE servers SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("server", id));
        }
        Ok(())
    }

    /// Write the observed fields and append a history row atomically.
    pub async fn update_stats(&self, server: &Server) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE servers SET status = ?, players_current = ?, cpu_usage = ?, \
             ram_usage = ?, storage_usage = ? WHERE id = ?",
        )
        .bind(server.status.to_string())
        .bind(server.players.current)
        .bind(server.resources.cpu)
        .bind(server.resources.ram)
        .bind(server.resources.storage)
        .bind(&server.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO resource_history (server_id, timestamp, cpu_usage, ram_usage, \
             players_current) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&server.id)
        .bind(encode_ts(Utc::now()))
        .bind(server.resources.cpu)
        .bind(server.resources.ram)
        .bind(server.players.current)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Resource samples for one server since `since`, oldest first.
    pub async fn history_for(
        &self,
        server_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ResourceDataPoint>> {
        let rows = sqlx::query(
            "SELECT timestamp, cpu_usage, ram_usage, players_current FROM resource_history \
             WHERE server_id = ? AND timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(server_id)
        .bind(encode_ts(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let ts: String = row.try_get("timestamp")?;
                Ok(ResourceDataPoint {
                    timestamp: decode_ts(&ts)?,
                    cpu_usage: row.try_get("cpu_usage")?,
                    ram_usage: row.try_get("ram_usage")?,
                    players_current: row.try_get("players_current")?,
                })
            })
            .collect()
    }

    /// Fleet-wide samples since `since`, summed per hour, oldest first.
    pub async fn history_summary(&self, since: DateTime<Utc>) -> Result<Vec<ResourceDataPoint>> {
        let rows = sqlx::query(
            "SELECT timestamp, SUM(cpu_usage) AS total_cpu, SUM(ram_usage) AS total_ram, \
             SUM(players_current) AS total_players FROM resource_history \
             WHERE timestamp >= ? GROUP BY strftime('%Y-%m-%d %H', timestamp) \
             ORDER BY timestamp ASC",
        )
        .bind(encode_ts(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let ts: String = row.try_get("timestamp")?;
                Ok(ResourceDataPoint {
                    timestamp: decode_ts(&ts)?,
                    cpu_usage: row.try_get::<Option<f64>, _>("total_cpu")?.unwrap_or(0.0),
                    ram_usage: row.try_get::<Option<f64>, _>("total_ram")?.unwrap_or(0.0),
                    players_current: row
                        .try_get::<Option<i64>, _>("total_players")?
                        .unwrap_or(0),
                })
            })
            .collect()
    }
}
