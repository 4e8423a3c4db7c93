//! Router construction

use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::handlers::{backups, events, schedules, servers, templates, users, ws};
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let auth_state = state.auth.clone();

    let api = Router::new()
        // Public routes
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/available-port", get(servers::available_port))
        // Dashboard & events
        .route("/dashboard/stats", get(servers::dashboard_stats))
        .route("/system/resources", get(servers::system_resources))
        .route("/events", get(events::recent_events))
        // Users
        .route("/users/me", get(users::me))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/{id}/change-password", post(users::change_password))
        // Servers
        .route(
            "/servers",
            get(servers::list_servers).post(servers::create_server),
        )
        .route("/servers/upload", post(servers::create_server_from_upload))
        .route(
            "/servers/{id}",
            get(servers::get_server)
                .put(servers::update_server)
                .delete(servers::delete_server),
        )
        .route("/servers/{id}/action", post(servers::perform_action))
        .route("/servers/{id}/command", post(servers::send_command))
        .route(
            "/servers/{id}/settings",
            get(servers::get_settings).post(servers::update_settings),
        )
        .route(
            "/servers/{id}/resources/history",
            get(servers::resource_history),
        )
        .route("/servers/{id}/players", get(servers::online_players))
        .route("/servers/{id}/players/manage", post(servers::manage_player))
        .route("/servers/{id}/files", get(servers::list_files))
        .route("/servers/{id}/files/content", get(servers::file_content))
        .route("/servers/{id}/files/update", post(servers::update_file))
        // Backups
        .route(
            "/servers/{id}/backups",
            get(backups::list_backups).post(backups::create_backup),
        )
        .route(
            "/servers/{id}/backups/{backupId}/restore",
            post(backups::restore_backup),
        )
        .route(
            "/servers/{id}/backups/{backupId}",
            delete(backups::delete_backup),
        )
        // Schedules
        .route(
            "/servers/{id}/schedules",
            get(schedules::list_schedules).post(schedules::create_schedule),
        )
        .route(
            "/servers/{id}/schedules/{scheduleId}",
            put(schedules::update_schedule).delete(schedules::delete_schedule),
        )
        // Templates
        .route(
            "/templates",
            get(templates::list_templates).post(templates::create_template),
        )
        .route(
            "/templates/{id}",
            get(templates::get_template)
                .put(templates::update_template)
                .delete(templates::delete_template),
        );

    Router::new()
        .nest("/api/v1", api)
        // Live session routes (authenticated via bearer or cookie)
        .route("/ws/global", get(ws::ws_global))
        .route("/ws/servers/{id}", get(ws::ws_server))
        .route("/api-docs/openapi.json", get(openapi_json))
        .with_state(state)
        .layer(Extension(auth_state))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(300))
}
