//! Backup endpoints
//!
//! Create and restore are long-running; both detach and answer 202.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;

use ender_store::Backup;

use crate::auth::AuthUser;
use crate::error::{ApiError, Result};
use crate::handlers::servers::MessageResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBackupPayload {
    pub name: String,
}

/// List a server's backups
#[utoipa::path(
    get,
    path = "/api/v1/servers/{id}/backups",
    params(("id" = String, Path, description = "Server id")),
    responses((status = 200, description = "Backups", body = Vec<Backup>)),
    tag = "Backups"
)]
pub async fn list_backups(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Backup>>> {
    Ok(Json(state.backups.list_for_server(&id).await?))
}

/// Start creating a backup
#[utoipa::path(
    post,
    path = "/api/v1/servers/{id}/backups",
    params(("id" = String, Path, description = "Server id")),
    request_body = CreateBackupPayload,
    responses(
        (status = 202, description = "Backup creation started", body = MessageResponse),
        (status = 400, description = "Name required"),
        (status = 404, description = "Server not found"),
    ),
    tag = "Backups"
)]
pub async fn create_backup(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateBackupPayload>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    if payload.name.is_empty() {
        return Err(ApiError::BadRequest("Backup name is required".to_string()));
    }
    // Fail fast on unknown servers before detaching.
    state.manager.get(&id).await?;

    let backups = state.backups.clone();
    tokio::spawn(async move {
        if let Err(e) = backups.create(&id, &payload.name).await {
            tracing::error!(server_id = %id, backup_name = %payload.name, error = %e,
                "failed to create backup in background");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Backup creation started.".to_string(),
        }),
    ))
}

/// Start restoring a backup
#[utoipa::path(
    post,
    path = "/api/v1/servers/{id}/backups/{backupId}/restore",
    params(
        ("id" = String, Path, description = "Server id"),
        ("backupId" = String, Path, description = "Backup id"),
    ),
    responses(
        (status = 202, description = "Restore started", body = MessageResponse),
        (status = 404, description = "Backup not found"),
    ),
    tag = "Backups"
)]
pub async fn restore_backup(
    _user: AuthUser,
    State(state): State<AppState>,
    Path((_server_id, backup_id)): Path<(String, String)>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    // Fail fast on unknown backups before detaching.
    state.backups.get(&backup_id).await?;

    let backups = state.backups.clone();
    tokio::spawn(async move {
        if let Err(e) = backups.restore(&backup_id).await {
            tracing::error!(backup_id = %backup_id, error = %e,
                "failed to restore backup in background");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Backup restoration started. The server will restart.".to_string(),
        }),
    ))
}

/// Delete a backup
#[utoipa::path(
    delete,
    path = "/api/v1/servers/{id}/backups/{backupId}",
    params(
        ("id" = String, Path, description = "Server id"),
        ("backupId" = String, Path, description = "Backup id"),
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
    ),
    tag = "Backups"
)]
pub async fn delete_backup(
    _user: AuthUser,
    State(state): State<AppState>,
    Path((_server_id, backup_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.backups.delete(&backup_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
