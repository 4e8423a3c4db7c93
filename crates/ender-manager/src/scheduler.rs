//! Cron scheduler
//!
//! Minute-resolution tick over the active schedules; due entries dispatch
//! concurrently and have their run bookkeeping advanced atomically.
//! Dispatch is best-effort at-least-once: a tick missed while the process
//! is down is not caught up.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use ender_store::{EventLevel, Schedule, ScheduleStore};

use crate::backup::BackupEngine;
use crate::error::{ManagerError, Result};
use crate::events::EventLog;
use crate::lifecycle::ServerManager;

const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Decoded schedule payload, discriminated by the stored task kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleTask {
    Start,
    Stop,
    Restart,
    Backup { name: String },
    Command { command: String },
}

impl ScheduleTask {
    /// Decode a task kind plus its opaque JSON payload. Unknown kinds and
    /// unusable payloads are invalid input.
    pub fn decode(kind: &str, payload: Option<&serde_json::Value>) -> Result<Self> {
        match kind {
            "start" => Ok(ScheduleTask::Start),
            "stop" => Ok(ScheduleTask::Stop),
            "restart" => Ok(ScheduleTask::Restart),
            "backup" => {
                let name = payload
                    .and_then(|p| p.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("Scheduled Backup")
                    .to_string();
                Ok(ScheduleTask::Backup { name })
            }
            "command" => {
                let command = payload
                    .and_then(|p| p.get("command"))
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        ManagerError::InvalidInput(
                            "invalid or missing command in schedule payload".to_string(),
                        )
                    })?
                    .to_string();
                Ok(ScheduleTask::Command { command })
            }
            other => Err(ManagerError::InvalidInput(format!(
                "unknown task type '{other}'"
            ))),
        }
    }
}

/// Parse an operator-facing 5-field cron expression.
///
/// The underlying parser wants a seconds field, so one is prefixed; the
/// operator never sees it.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    let normalized = format!("0 {}", expr.trim());
    cron::Schedule::from_str(&normalized)
        .map_err(|e| ManagerError::InvalidInput(format!("invalid cron expression '{expr}': {e}")))
}

/// Next firing of `expr` strictly after `after`.
pub fn next_run_after(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse_cron(expr)?
        .after(&after)
        .next()
        .ok_or_else(|| ManagerError::InvalidInput(format!("cron expression '{expr}' never fires")))
}

/// Background dispatcher plus the schedule CRUD the HTTP surface calls.
pub struct Scheduler {
    schedules: ScheduleStore,
    manager: ServerManager,
    backups: BackupEngine,
    events: EventLog,
    running: AtomicBool,
    shutdown: tokio::sync::Notify,
}

impl Scheduler {
    pub fn new(
        schedules: ScheduleStore,
        manager: ServerManager,
        backups: BackupEngine,
        events: EventLog,
    ) -> Self {
        Self {
            schedules,
            manager,
            backups,
            events,
            running: AtomicBool::new(false),
            shutdown: tokio::sync::Notify::new(),
        }
    }

    /// Run until `shutdown()`. One immediate pass, then every minute.
    pub async fn run_loop(self: Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("scheduler is already running");
            return;
        }

        tracing::info!("scheduler started");
        let mut interval = tokio::time::interval(TICK_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_and_run().await;
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("scheduler received shutdown signal");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("scheduler stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// One tick: dispatch every due schedule and advance its run times.
    /// Public so tests can drive a tick directly.
    pub async fn check_and_run(self: &Arc<Self>) {
        let schedules = match self.schedules.list_active().await {
            Ok(schedules) => schedules,
            Err(e) => {
                tracing::error!(error = %e, "scheduler failed to load active schedules");
                return;
            }
        };

        let now = Utc::now();
        for schedule in schedules {
            let due = schedule.next_run_at.is_some_and(|next| next <= now);
            if !due {
                continue;
            }

            let next_run = match next_run_after(&schedule.cron_expression, now) {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(schedule_id = %schedule.id, error = %e,
                        "invalid cron expression on stored schedule");
                    continue;
                }
            };

            if let Err(e) = self
                .schedules
                .update_run_times(&schedule.id, now, next_run)
                .await
            {
                tracing::error!(schedule_id = %schedule.id, error = %e,
                    "failed to advance schedule run times");
                continue;
            }

            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.execute(schedule).await;
            });
        }
    }

    async fn execute(&self, schedule: Schedule) {
        tracing::info!(schedule_id = %schedule.id, name = %schedule.name,
            server_id = %schedule.server_id, "executing scheduled task");

        let result = match ScheduleTask::decode(&schedule.task_type, schedule.payload.as_ref()) {
            Ok(ScheduleTask::Start) => self
                .manager
                .perform_action(&schedule.server_id, "start")
                .await
                .map(|_| ()),
            Ok(ScheduleTask::Stop) => self
                .manager
                .perform_action(&schedule.server_id, "stop")
                .await
                .map(|_| ()),
            Ok(ScheduleTask::Restart) => self
                .manager
                .perform_action(&schedule.server_id, "restart")
                .await
                .map(|_| ()),
            Ok(ScheduleTask::Backup { name }) => {
                // Backups run long; detach and report dispatch success.
                let backups = self.backups.clone();
                let server_id = schedule.server_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = backups.create(&server_id, &name).await {
                        tracing::error!(server_id = %server_id, error = %e,
                            "scheduled backup failed");
                    }
                });
                Ok(())
            }
            Ok(ScheduleTask::Command { command }) => self
                .manager
                .send_command(&schedule.server_id, &command)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.events
                    .emit(
                        "schedule.execute.success",
                        EventLevel::Info,
                        format!("Scheduled task '{}' executed successfully.", schedule.name),
                        Some(&schedule.server_id),
                    )
                    .await;
            }
            Err(e) => {
                tracing::error!(schedule_id = %schedule.id, error = %e,
                    "scheduled task failed");
                self.events
                    .emit(
                        "schedule.execute.fail",
                        EventLevel::Error,
                        format!("Scheduled task '{}' failed to execute: {e}", schedule.name),
                        Some(&schedule.server_id),
                    )
                    .await;
            }
        }
    }

    // Schedule CRUD ---------------------------------------------------------

    pub async fn list_for_server(&self, server_id: &str) -> Result<Vec<Schedule>> {
        Ok(self.schedules.list_for_server(server_id).await?)
    }

    pub async fn create_schedule(
        &self,
        server_id: &str,
        name: &str,
        cron_expression: &str,
        task_type: &str,
        payload: Option<serde_json::Value>,
        is_active: bool,
    ) -> Result<Schedule> {
        // Validate both halves up front.
        ScheduleTask::decode(task_type, payload.as_ref())?;
        let now = Utc::now();
        let next_run = next_run_after(cron_expression, now)?;

        let schedule = Schedule {
            id: Uuid::new_v4().to_string(),
            server_id: server_id.to_string(),
            name: name.to_string(),
            cron_expression: cron_expression.to_string(),
            task_type: task_type.to_string(),
            payload,
            is_active,
            last_run_at: None,
            next_run_at: Some(next_run),
            created_at: now,
        };
        self.schedules.insert(&schedule).await?;

        self.events
            .emit(
                "schedule.create",
                EventLevel::Info,
                format!("Schedule '{}' created for server.", schedule.name),
                Some(server_id),
            )
            .await;

        Ok(self.schedules.get(&schedule.id).await?)
    }

    pub async fn update_schedule(
        &self,
        schedule_id: &str,
        name: &str,
        cron_expression: &str,
        task_type: &str,
        payload: Option<serde_json::Value>,
        is_active: bool,
    ) -> Result<Schedule> {
        ScheduleTask::decode(task_type, payload.as_ref())?;
        let existing = self.schedules.get(schedule_id).await?;
        let next_run = next_run_after(cron_expression, Utc::now())?;

        let updated = Schedule {
            name: name.to_string(),
            cron_expression: cron_expression.to_string(),
            task_type: task_type.to_string(),
            payload,
            is_active,
            next_run_at: Some(next_run),
            ..existing
        };
        let stored = self.schedules.update(schedule_id, &updated).await?;

        self.events
            .emit(
                "schedule.update",
                EventLevel::Info,
                format!("Schedule '{}' updated.", stored.name),
                Some(&stored.server_id),
            )
            .await;

        Ok(stored)
    }

    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<()> {
        let schedule = self.schedules.get(schedule_id).await?;
        self.schedules.delete(schedule_id).await?;

        self.events
            .emit(
                "schedule.delete",
                EventLevel::Warn,
                format!("Schedule '{}' was deleted.", schedule.name),
                Some(&schedule.server_id),
            )
            .await;
        Ok(())
    }
}
