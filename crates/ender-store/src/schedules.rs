//! Schedule catalogue access
//!
//! Cron parsing and `next_run_at` computation belong to the scheduler; this
//! module only persists what it is given.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::{decode_ts, decode_ts_opt, encode_ts};
use crate::error::{Result, StoreError};
use crate::models::Schedule;

const SCHEDULE_COLUMNS: &str = "id, server_id, name, cron_expression, task_type, payload_json, \
     is_active, last_run_at, next_run_at, created_at";

fn scan_schedule(row: &SqliteRow) -> Result<Schedule> {
    let payload_json: Option<String> = row.try_get("payload_json")?;
    let last_run_at: Option<String> = row.try_get("last_run_at")?;
    let next_run_at: Option<String> = row.try_get("next_run_at")?;
    let created_at: String = row.try_get("created_at")?;

    let payload = payload_json
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str)
        .transpose()?;

    Ok(Schedule {
        id: row.try_get("id")?,
        server_id: row.try_get("server_id")?,
        name: row.try_get("name")?,
        cron_expression: row.try_get("cron_expression")?,
        task_type: row.try_get("task_type")?,
        payload,
        is_active: row.try_get("is_active")?,
        last_run_at: decode_ts_opt(last_run_at)?,
        next_run_at: decode_ts_opt(next_run_at)?,
        created_at: decode_ts(&created_at)?,
    })
}

/// Access to the `schedules` table.
#[derive(Clone)]
pub struct ScheduleStore {
    pool: SqlitePool,
}

impl ScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_for_server(&self, server_id: &str) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE server_id = ? \
             ORDER BY created_at DESC"
        ))
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(scan_schedule).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Schedule> {
        let row = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("schedule", id))?;
        scan_schedule(&row)
    }

    pub async fn list_active(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE is_active = 1"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(scan_schedule).collect()
    }

    pub async fn insert(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            "INSERT INTO schedules (id, server_id, name, cron_expression, task_type, \
             payload_json, is_active, last_run_at, next_run_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&schedule.id)
        .bind(&schedule.server_id)
        .bind(&schedule.name)
        .bind(&schedule.cron_expression)
        .bind(&schedule.task_type)
        .bind(
            schedule
                .payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(schedule.is_active)
        .bind(schedule.last_run_at.map(encode_ts))
        .bind(schedule.next_run_at.map(encode_ts))
        .bind(encode_ts(schedule.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, id: &str, schedule: &Schedule) -> Result<Schedule> {
        let result = sqlx::query(
            "UPDATE schedules SET name = ?, cron_expression = ?, task_type = ?, \
             payload_json = ?, is_active = ?, next_run_at = ? WHERE id = ?",
        )
        .bind(&schedule.name)
        .bind(&schedule.cron_expression)
        .bind(&schedule.task_type)
        .bind(
            schedule
                .payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(schedule.is_active)
        .bind(schedule.next_run_at.map(encode_ts))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("schedule", id));
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("schedule", id));
        }
        Ok(())
    }

    /// Advance run bookkeeping after a dispatch, atomically.
    pub async fn update_run_times(
        &self,
        id: &str,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE schedules SET last_run_at = ?, next_run_at = ? WHERE id = ?")
            .bind(encode_ts(last_run))
            .bind(encode_ts(next_run))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::models::Server;
    use crate::ServerStore;

    async fn fixtures() -> (ServerStore, ScheduleStore) {
        let pool = connect_in_memory().await.unwrap();
        let servers = ServerStore::new(pool.clone());
        servers
            .insert(&Server::new("s1".to_string(), "srv".to_string()))
            .await
            .unwrap();
        (servers, ScheduleStore::new(pool))
    }

    fn sample_schedule(id: &str, active: bool) -> Schedule {
        Schedule {
            id: id.to_string(),
            server_id: "s1".to_string(),
            name: "nightly restart".to_string(),
            cron_expression: "0 4 * * *".to_string(),
            task_type: "restart".to_string(),
            payload: None,
            is_active: active,
            last_run_at: None,
            next_run_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_with_payload() {
        let (_, schedules) = fixtures().await;
        let mut schedule = sample_schedule("c1", true);
        schedule.task_type = "backup".to_string();
        schedule.payload = Some(serde_json::json!({"name": "Nightly"}));
        schedules.insert(&schedule).await.unwrap();

        let fetched = schedules.get("c1").await.unwrap();
        assert_eq!(fetched.task_type, "backup");
        assert_eq!(fetched.payload.unwrap()["name"], "Nightly");
    }

    #[tokio::test]
    async fn test_list_active_filters() {
        let (_, schedules) = fixtures().await;
        schedules.insert(&sample_schedule("on", true)).await.unwrap();
        schedules
            .insert(&sample_schedule("off", false))
            .await
            .unwrap();

        let active = schedules.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "on");
    }

    #[tokio::test]
    async fn test_update_run_times() {
        let (_, schedules) = fixtures().await;
        schedules.insert(&sample_schedule("c1", true)).await.unwrap();

        let last = Utc::now();
        let next = last + chrono::Duration::minutes(1);
        schedules.update_run_times("c1", last, next).await.unwrap();

        let fetched = schedules.get("c1").await.unwrap();
        let stored_last = fetched.last_run_at.unwrap();
        let stored_next = fetched.next_run_at.unwrap();
        assert!(stored_next > stored_last);
        assert!((stored_next - stored_last).num_seconds() == 60);
    }

    #[tokio::test]
    async fn test_server_delete_cascades() {
        let (servers, schedules) = fixtures().await;
        schedules.insert(&sample_schedule("c1", true)).await.unwrap();

        servers.delete("s1").await.unwrap();
        assert!(schedules.list_for_server("s1").await.unwrap().is_empty());
    }
}
