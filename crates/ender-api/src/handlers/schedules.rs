//! Schedule endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;

use ender_store::Schedule;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePayload {
    pub name: String,
    pub cron_expression: String,
    pub task_type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Option<serde_json::Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// List a server's schedules
#[utoipa::path(
    get,
    path = "/api/v1/servers/{id}/schedules",
    params(("id" = String, Path, description = "Server id")),
    responses((status = 200, description = "Schedules", body = Vec<Schedule>)),
    tag = "Schedules"
)]
pub async fn list_schedules(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Schedule>>> {
    Ok(Json(state.scheduler.list_for_server(&id).await?))
}

/// Create a schedule
#[utoipa::path(
    post,
    path = "/api/v1/servers/{id}/schedules",
    params(("id" = String, Path, description = "Server id")),
    request_body = SchedulePayload,
    responses(
        (status = 201, description = "Schedule created", body = Schedule),
        (status = 400, description = "Malformed cron or task"),
    ),
    tag = "Schedules"
)]
pub async fn create_schedule(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SchedulePayload>,
) -> Result<(StatusCode, Json<Schedule>)> {
    let schedule = state
        .scheduler
        .create_schedule(
            &id,
            &payload.name,
            &payload.cron_expression,
            &payload.task_type,
            payload.payload,
            payload.is_active,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// Update a schedule
#[utoipa::path(
    put,
    path = "/api/v1/servers/{id}/schedules/{scheduleId}",
    params(
        ("id" = String, Path, description = "Server id"),
        ("scheduleId" = String, Path, description = "Schedule id"),
    ),
    request_body = SchedulePayload,
    responses(
        (status = 200, description = "Updated schedule", body = Schedule),
        (status = 404, description = "Not found"),
    ),
    tag = "Schedules"
)]
pub async fn update_schedule(
    _user: AuthUser,
    State(state): State<AppState>,
    Path((_server_id, schedule_id)): Path<(String, String)>,
    Json(payload): Json<SchedulePayload>,
) -> Result<Json<Schedule>> {
    let schedule = state
        .scheduler
        .update_schedule(
            &schedule_id,
            &payload.name,
            &payload.cron_expression,
            &payload.task_type,
            payload.payload,
            payload.is_active,
        )
        .await?;
    Ok(Json(schedule))
}

/// Delete a schedule
#[utoipa::path(
    delete,
    path = "/api/v1/servers/{id}/schedules/{scheduleId}",
    params(
        ("id" = String, Path, description = "Server id"),
        ("scheduleId" = String, Path, description = "Schedule id"),
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
    ),
    tag = "Schedules"
)]
pub async fn delete_schedule(
    _user: AuthUser,
    State(state): State<AppState>,
    Path((_server_id, schedule_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.scheduler.delete_schedule(&schedule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
