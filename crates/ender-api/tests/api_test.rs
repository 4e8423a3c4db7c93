//! End-to-end tests of the HTTP surface against a mock runtime and an
//! in-memory catalogue.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::util::ServiceExt;

use ender_api::{build_router, AppState, AuthState, Config};
use ender_manager::{
    BackupEngine, EventLog, Hub, RconDialer, RconError, Scheduler, ServerManager,
};
use ender_runtime::MockRuntime;
use ender_store::{connect_in_memory, BackupStore, EventStore, ScheduleStore, ServerStore, TemplateStore};

struct QuietDialer;

#[async_trait::async_trait]
impl RconDialer for QuietDialer {
    async fn probe(&self, _addr: &str, _password: &str) -> Result<(), RconError> {
        Ok(())
    }
    async fn execute(
        &self,
        _addr: &str,
        _password: &str,
        _command: &str,
    ) -> Result<String, RconError> {
        Ok(String::new())
    }
}

struct TestApp {
    router: Router,
    _data_root: tempfile::TempDir,
    _backup_root: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    let pool = connect_in_memory().await.unwrap();
    let servers = ServerStore::new(pool.clone());
    let templates = TemplateStore::new(pool.clone());
    let schedules = ScheduleStore::new(pool.clone());
    let backups_store = BackupStore::new(pool.clone());
    let events_store = EventStore::new(pool.clone());
    let users = ender_store::UserStore::new(pool);

    let runtime = Arc::new(MockRuntime::new());
    let hub = Arc::new(Hub::new());
    let events = EventLog::new(events_store.clone());
    let data_root = tempfile::TempDir::new().unwrap();
    let backup_root = tempfile::TempDir::new().unwrap();

    let manager = ServerManager::new(
        servers.clone(),
        templates.clone(),
        runtime,
        hub.clone(),
        events.clone(),
        Arc::new(QuietDialer),
        data_root.path().to_path_buf(),
    );
    let backups = BackupEngine::new(
        servers,
        backups_store,
        events.clone(),
        manager.clone(),
        backup_root.path().to_path_buf(),
    );
    let scheduler = Arc::new(Scheduler::new(
        schedules,
        manager.clone(),
        backups.clone(),
        events,
    ));

    let config = Config {
        port: 0,
        database_path: ":memory:".into(),
        server_data_base: data_root.path().to_path_buf(),
        backup_path: backup_root.path().to_path_buf(),
        jwt_secret: "test-secret".to_string(),
        app_env: "development".to_string(),
    };

    let state = AppState {
        manager,
        backups,
        scheduler,
        hub,
        users,
        templates,
        events: events_store,
        auth: AuthState {
            jwt_secret: config.jwt_secret.clone(),
        },
        secure_cookies: config.is_production(),
    };

    TestApp {
        router: build_router(state),
        _data_root: data_root,
        _backup_root: backup_root,
    }
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let app = test_app().await;
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/v1/servers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_login_and_list_servers() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/register",
            None,
            serde_json::json!({
                "username": "alice",
                "email": "alice@example.com",
                "password": "hunter2"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let user = body_json(response).await;
    assert_eq!(user["username"], "alice");
    assert!(user.get("passwordHash").is_none());

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/login",
            None,
            serde_json::json!({"email": "alice@example.com", "password": "hunter2"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("token="));
    let login = body_json(response).await;
    let token = login["token"].as_str().unwrap().to_string();

    // Bearer header works.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/servers")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));

    // Cookie works too.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/me")
                .header(header::COOKIE, format!("token={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bad_login_rejected() {
    let app = test_app().await;
    let response = app
        .router
        .oneshot(json_request(
            "POST",
            "/api/v1/login",
            None,
            serde_json::json!({"email": "ghost@example.com", "password": "nope"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_server_lifecycle_over_http() {
    let app = test_app().await;
    let token = register_and_login(&app.router).await;

    // Create a template.
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/templates",
            Some(&token),
            serde_json::json!({
                "name": "Vanilla",
                "minecraftVersion": "1.21",
                "javaVersion": "21",
                "maxMemoryMB": 2048,
                "properties": {"max-players": "16"}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let template = body_json(response).await;
    let template_id = template["id"].as_str().unwrap().to_string();

    // Create a server from it.
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/servers",
            Some(&token),
            serde_json::json!({"name": "s1", "templateId": template_id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let server = body_json(response).await;
    assert_eq!(server["status"], "offline");
    assert_eq!(server["players"]["max"], 16);
    // Internal columns never serialize.
    assert!(server.get("rconPassword").is_none());
    assert!(server.get("dataPath").is_none());
    let server_id = server["id"].as_str().unwrap().to_string();

    // Unknown action is a 400.
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/servers/{server_id}/action"),
            Some(&token),
            serde_json::json!({"action": "explode"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Command against an offline server is a 409.
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/servers/{server_id}/command"),
            Some(&token),
            serde_json::json!({"command": "list"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("server is not online"));

    // Template deletion refused while referenced.
    let template_id = server["templateId"].as_str().unwrap();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/templates/{template_id}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Delete the server.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/servers/{server_id}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_missing_server_is_404() {
    let app = test_app().await;
    let token = register_and_login(&app.router).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/v1/servers/ghost")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_available_port_endpoint() {
    let app = test_app().await;
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/v1/available-port?preferred=26000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["port"].as_u64().unwrap() >= 26000);
}

async fn register_and_login(router: &Router) -> String {
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/register",
            None,
            serde_json::json!({
                "username": "op",
                "email": "op@example.com",
                "password": "secret"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/login",
            None,
            serde_json::json!({"email": "op@example.com", "password": "secret"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string()
}
