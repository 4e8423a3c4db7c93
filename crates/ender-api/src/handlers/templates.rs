//! Template (blueprint) endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

use ender_store::Template;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePayload {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub minecraft_version: String,
    pub java_version: String,
    #[serde(default)]
    pub server_type: String,
    #[serde(rename = "minMemoryMB", default)]
    pub min_memory_mb: i64,
    #[serde(rename = "maxMemoryMB")]
    pub max_memory_mb: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub jvm_args: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub archive_path: Option<String>,
    #[serde(default)]
    pub startup_command: Option<String>,
}

impl TemplatePayload {
    fn into_template(self, id: String) -> Template {
        Template {
            id,
            name: self.name,
            description: self.description,
            minecraft_version: self.minecraft_version,
            java_version: self.java_version,
            server_type: self.server_type,
            min_memory_mb: self.min_memory_mb,
            max_memory_mb: self.max_memory_mb,
            tags: self.tags,
            jvm_args: self.jvm_args,
            properties: self.properties,
            archive_path: self.archive_path,
            startup_command: self.startup_command,
        }
    }
}

/// List all templates
#[utoipa::path(
    get,
    path = "/api/v1/templates",
    responses((status = 200, description = "Templates", body = Vec<Template>)),
    tag = "Templates"
)]
pub async fn list_templates(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Template>>> {
    Ok(Json(state.templates.list().await?))
}

/// Fetch one template
#[utoipa::path(
    get,
    path = "/api/v1/templates/{id}",
    params(("id" = String, Path, description = "Template id")),
    responses(
        (status = 200, description = "Template", body = Template),
        (status = 404, description = "Not found"),
    ),
    tag = "Templates"
)]
pub async fn get_template(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Template>> {
    Ok(Json(state.templates.get(&id).await?))
}

/// Create a template
#[utoipa::path(
    post,
    path = "/api/v1/templates",
    request_body = TemplatePayload,
    responses((status = 201, description = "Template created", body = Template)),
    tag = "Templates"
)]
pub async fn create_template(
    _user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<TemplatePayload>,
) -> Result<(StatusCode, Json<Template>)> {
    let template = payload.into_template(Uuid::new_v4().to_string());
    state.templates.insert(&template).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// Update a template
#[utoipa::path(
    put,
    path = "/api/v1/templates/{id}",
    params(("id" = String, Path, description = "Template id")),
    request_body = TemplatePayload,
    responses(
        (status = 200, description = "Updated template", body = Template),
        (status = 404, description = "Not found"),
    ),
    tag = "Templates"
)]
pub async fn update_template(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<TemplatePayload>,
) -> Result<Json<Template>> {
    let template = payload.into_template(id.clone());
    Ok(Json(state.templates.update(&id, &template).await?))
}

/// Delete a template; refused while any server references it
#[utoipa::path(
    delete,
    path = "/api/v1/templates/{id}",
    params(("id" = String, Path, description = "Template id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Template still referenced"),
    ),
    tag = "Templates"
)]
pub async fn delete_template(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.templates.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
