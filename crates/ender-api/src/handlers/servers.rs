//! Server endpoints: CRUD, lifecycle actions, console commands, settings,
//! files, players, resource history, dashboard aggregations

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use ender_manager::find_available_port;
use ender_store::{DashboardStats, FileInfo, OnlinePlayer, ResourceDataPoint, Server, ServerSettings};

use crate::auth::AuthUser;
use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateServerPayload {
    pub name: String,
    #[serde(rename = "templateId")]
    pub template_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerPayload {
    pub name: String,
    pub minecraft_version: String,
    pub java_version: String,
    pub max_players: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActionPayload {
    pub action: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommandPayload {
    pub command: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateFilePayload {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ManagePlayerPayload {
    pub action: String,
    pub player: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct FileQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PortQuery {
    pub preferred: Option<u16>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// List all servers
#[utoipa::path(
    get,
    path = "/api/v1/servers",
    responses((status = 200, description = "All servers", body = Vec<Server>)),
    tag = "Servers"
)]
pub async fn list_servers(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Server>>> {
    Ok(Json(state.manager.list().await?))
}

/// Fetch one server
#[utoipa::path(
    get,
    path = "/api/v1/servers/{id}",
    params(("id" = String, Path, description = "Server id")),
    responses(
        (status = 200, description = "Server", body = Server),
        (status = 404, description = "Not found"),
    ),
    tag = "Servers"
)]
pub async fn get_server(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Server>> {
    Ok(Json(state.manager.get(&id).await?))
}

/// Create a server from a template
#[utoipa::path(
    post,
    path = "/api/v1/servers",
    request_body = CreateServerPayload,
    responses(
        (status = 201, description = "Server created", body = Server),
        (status = 404, description = "Template not found"),
    ),
    tag = "Servers"
)]
pub async fn create_server(
    _user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateServerPayload>,
) -> Result<(StatusCode, Json<Server>)> {
    let server = state
        .manager
        .create_from_template(&payload.name, &payload.template_id)
        .await?;
    Ok((StatusCode::CREATED, Json(server)))
}

/// Create a server from an uploaded archive (multipart: `name`,
/// `javaVersion`, `serverExecutable`, `maxMemoryMB`, `file`)
#[utoipa::path(
    post,
    path = "/api/v1/servers/upload",
    responses(
        (status = 201, description = "Server created", body = Server),
        (status = 400, description = "Missing fields"),
    ),
    tag = "Servers"
)]
pub async fn create_server_from_upload(
    _user: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Server>)> {
    let mut name = None;
    let mut java_version = None;
    let mut entrypoint = None;
    let mut max_memory_mb: i64 = 1024;
    let mut staged: Option<tempfile::NamedTempFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "name" => name = Some(read_text(field).await?),
            "javaVersion" => java_version = Some(read_text(field).await?),
            "serverExecutable" => entrypoint = Some(read_text(field).await?),
            "maxMemoryMB" => {
                max_memory_mb = read_text(field)
                    .await?
                    .parse()
                    .map_err(|e| ApiError::BadRequest(format!("invalid maxMemoryMB: {e}")))?;
            }
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;
                let tmp = tempfile::NamedTempFile::new()
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                std::fs::write(tmp.path(), &bytes)
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                staged = Some(tmp);
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| ApiError::BadRequest("name is required".to_string()))?;
    let java_version =
        java_version.ok_or_else(|| ApiError::BadRequest("javaVersion is required".to_string()))?;
    let entrypoint = entrypoint
        .ok_or_else(|| ApiError::BadRequest("serverExecutable is required".to_string()))?;
    let staged =
        staged.ok_or_else(|| ApiError::BadRequest("file is required".to_string()))?;

    let server = state
        .manager
        .create_from_upload(&name, &java_version, &entrypoint, max_memory_mb, staged.path())
        .await?;
    Ok((StatusCode::CREATED, Json(server)))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart field: {e}")))
}

/// Update descriptive fields
#[utoipa::path(
    put,
    path = "/api/v1/servers/{id}",
    params(("id" = String, Path, description = "Server id")),
    request_body = UpdateServerPayload,
    responses(
        (status = 200, description = "Updated server", body = Server),
        (status = 404, description = "Not found"),
    ),
    tag = "Servers"
)]
pub async fn update_server(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateServerPayload>,
) -> Result<Json<Server>> {
    let server = state
        .manager
        .update(
            &id,
            &payload.name,
            &payload.minecraft_version,
            &payload.java_version,
            payload.max_players,
        )
        .await?;
    Ok(Json(server))
}

/// Delete a server, its container and its working tree
#[utoipa::path(
    delete,
    path = "/api/v1/servers/{id}",
    params(("id" = String, Path, description = "Server id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
    ),
    tag = "Servers"
)]
pub async fn delete_server(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.manager.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Perform a lifecycle action (start, stop, restart, reinstall)
#[utoipa::path(
    post,
    path = "/api/v1/servers/{id}/action",
    params(("id" = String, Path, description = "Server id")),
    request_body = ActionPayload,
    responses(
        (status = 200, description = "Action performed", body = MessageResponse),
        (status = 400, description = "Unknown action"),
        (status = 404, description = "Not found"),
    ),
    tag = "Servers"
)]
pub async fn perform_action(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ActionPayload>,
) -> Result<Json<MessageResponse>> {
    state.manager.perform_action(&id, &payload.action).await?;
    Ok(Json(MessageResponse {
        message: format!("Action '{}' performed successfully", payload.action),
    }))
}

/// Send a console command over the remote console
#[utoipa::path(
    post,
    path = "/api/v1/servers/{id}/command",
    params(("id" = String, Path, description = "Server id")),
    request_body = CommandPayload,
    responses(
        (status = 200, description = "Command sent", body = MessageResponse),
        (status = 409, description = "Server is not online"),
    ),
    tag = "Servers"
)]
pub async fn send_command(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CommandPayload>,
) -> Result<Json<MessageResponse>> {
    state.manager.send_command(&id, &payload.command).await?;
    Ok(Json(MessageResponse {
        message: "Command sent successfully".to_string(),
    }))
}

/// Parsed server.properties
#[utoipa::path(
    get,
    path = "/api/v1/servers/{id}/settings",
    params(("id" = String, Path, description = "Server id")),
    responses((status = 200, description = "Settings map", body = Object)),
    tag = "Servers"
)]
pub async fn get_settings(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServerSettings>> {
    Ok(Json(state.manager.settings(&id).await?))
}

/// Replace server.properties and restart
#[utoipa::path(
    post,
    path = "/api/v1/servers/{id}/settings",
    params(("id" = String, Path, description = "Server id")),
    responses((status = 200, description = "Settings updated", body = MessageResponse)),
    tag = "Servers"
)]
pub async fn update_settings(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(settings): Json<ServerSettings>,
) -> Result<Json<MessageResponse>> {
    state.manager.update_settings(&id, &settings).await?;
    Ok(Json(MessageResponse {
        message: "Settings updated, restart in progress".to_string(),
    }))
}

/// Recent resource samples for one server
#[utoipa::path(
    get,
    path = "/api/v1/servers/{id}/resources/history",
    params(("id" = String, Path, description = "Server id")),
    responses((status = 200, description = "Samples", body = Vec<ResourceDataPoint>)),
    tag = "Servers"
)]
pub async fn resource_history(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ResourceDataPoint>>> {
    Ok(Json(state.manager.resource_history(&id).await?))
}

/// Players currently online
#[utoipa::path(
    get,
    path = "/api/v1/servers/{id}/players",
    params(("id" = String, Path, description = "Server id")),
    responses(
        (status = 200, description = "Players", body = Vec<OnlinePlayer>),
        (status = 409, description = "Server is not online"),
    ),
    tag = "Servers"
)]
pub async fn online_players(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OnlinePlayer>>> {
    Ok(Json(state.manager.online_players(&id).await?))
}

/// Kick or ban a player
#[utoipa::path(
    post,
    path = "/api/v1/servers/{id}/players/manage",
    params(("id" = String, Path, description = "Server id")),
    request_body = ManagePlayerPayload,
    responses(
        (status = 200, description = "Done", body = MessageResponse),
        (status = 400, description = "Unsupported action"),
    ),
    tag = "Servers"
)]
pub async fn manage_player(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ManagePlayerPayload>,
) -> Result<Json<MessageResponse>> {
    state
        .manager
        .manage_player(&id, &payload.action, &payload.player, &payload.reason)
        .await?;
    Ok(Json(MessageResponse {
        message: format!("Player {} {}ed successfully", payload.player, payload.action),
    }))
}

/// List working-tree entries
#[utoipa::path(
    get,
    path = "/api/v1/servers/{id}/files",
    params(("id" = String, Path, description = "Server id"), FileQuery),
    responses((status = 200, description = "Entries", body = Vec<FileInfo>)),
    tag = "Servers"
)]
pub async fn list_files(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Vec<FileInfo>>> {
    let path = query.path.unwrap_or_default();
    Ok(Json(state.manager.list_files(&id, &path).await?))
}

/// Read one working-tree file
#[utoipa::path(
    get,
    path = "/api/v1/servers/{id}/files/content",
    params(("id" = String, Path, description = "Server id"), FileQuery),
    responses(
        (status = 200, description = "File contents", body = String),
        (status = 400, description = "Path required"),
    ),
    tag = "Servers"
)]
pub async fn file_content(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Vec<u8>> {
    let path = query
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("File path is required".to_string()))?;
    Ok(state.manager.file_content(&id, &path).await?)
}

/// Replace one working-tree file
#[utoipa::path(
    post,
    path = "/api/v1/servers/{id}/files/update",
    params(("id" = String, Path, description = "Server id")),
    request_body = UpdateFilePayload,
    responses((status = 200, description = "File updated", body = MessageResponse)),
    tag = "Servers"
)]
pub async fn update_file(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateFilePayload>,
) -> Result<Json<MessageResponse>> {
    state
        .manager
        .update_file(&id, &payload.path, payload.content.as_bytes())
        .await?;
    Ok(Json(MessageResponse {
        message: "File updated successfully".to_string(),
    }))
}

/// Fleet-wide dashboard aggregation
#[utoipa::path(
    get,
    path = "/api/v1/dashboard/stats",
    responses((status = 200, description = "Stats", body = DashboardStats)),
    tag = "Dashboard"
)]
pub async fn dashboard_stats(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<DashboardStats>> {
    Ok(Json(state.manager.dashboard_stats().await?))
}

/// Host RAM versus allocated RAM
#[utoipa::path(
    get,
    path = "/api/v1/system/resources",
    responses((status = 200, description = "System resources", body = Object)),
    tag = "Dashboard"
)]
pub async fn system_resources(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ender_manager::SystemResources>> {
    Ok(Json(state.manager.system_resource_stats().await?))
}

/// Find a free host port at or above the preferred one
#[utoipa::path(
    get,
    path = "/api/v1/available-port",
    params(PortQuery),
    responses((status = 200, description = "Port", body = Object)),
    tag = "Servers"
)]
pub async fn available_port(Query(query): Query<PortQuery>) -> Result<Json<serde_json::Value>> {
    let port = find_available_port(query.preferred.unwrap_or(25565))?;
    Ok(Json(json!({ "port": port })))
}
