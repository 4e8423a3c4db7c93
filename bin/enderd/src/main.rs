//! ender-deploy daemon
//!
//! Wires the catalogue, the Docker runtime, the session hub, the background
//! loops and the HTTP surface together, then serves until interrupted.

use std::fs;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use ender_api::{build_router, ApiServer, AppState, AuthState, Config};
use ender_manager::{
    BackupEngine, EventLog, Hub, Scheduler, ServerManager, StatReconciler, TcpRconDialer,
};
use ender_runtime::DockerRuntime;
use ender_store::{BackupStore, EventStore, ScheduleStore, ServerStore, TemplateStore, UserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    tracing::info!(
        port = config.port,
        database = %config.database_path.display(),
        "starting ender-deploy"
    );

    fs::create_dir_all(&config.server_data_base)
        .context("failed to create server data directory")?;
    fs::create_dir_all(&config.backup_path).context("failed to create backup directory")?;

    let data_root = config
        .server_data_base
        .canonicalize()
        .context("failed to resolve server data directory")?;
    let backup_root = config
        .backup_path
        .canonicalize()
        .context("failed to resolve backup directory")?;

    // Catalogue
    let pool = ender_store::connect(&config.database_path)
        .await
        .context("failed to open catalogue database")?;
    ender_store::migrate(&pool)
        .await
        .context("failed to apply catalogue schema")?;

    let servers = ServerStore::new(pool.clone());
    let templates = TemplateStore::new(pool.clone());
    let users = UserStore::new(pool.clone());
    let backups_store = BackupStore::new(pool.clone());
    let schedules = ScheduleStore::new(pool.clone());
    let events_store = EventStore::new(pool);

    // Runtime
    let runtime = Arc::new(
        DockerRuntime::new()
            .await
            .context("failed to connect to the container runtime")?,
    );

    // Live session bus
    let hub = Arc::new(Hub::new());

    // Core services
    let events = EventLog::new(events_store.clone());
    let manager = ServerManager::new(
        servers.clone(),
        templates.clone(),
        runtime.clone(),
        hub.clone(),
        events.clone(),
        Arc::new(TcpRconDialer),
        data_root,
    );
    let backups = BackupEngine::new(
        servers.clone(),
        backups_store,
        events.clone(),
        manager.clone(),
        backup_root,
    );
    let scheduler = Arc::new(Scheduler::new(
        schedules,
        manager.clone(),
        backups.clone(),
        events.clone(),
    ));
    let reconciler = Arc::new(StatReconciler::new(
        servers,
        runtime,
        hub.clone(),
        events,
    ));

    // Background loops
    tokio::spawn(reconciler.clone().run_loop());
    tokio::spawn(scheduler.clone().run_loop());

    // HTTP surface
    let state = AppState {
        manager,
        backups,
        scheduler: scheduler.clone(),
        hub,
        users,
        templates,
        events: events_store,
        auth: AuthState {
            jwt_secret: config.jwt_secret.clone(),
        },
        secure_cookies: config.is_production(),
    };

    let router = build_router(state);
    let result = ApiServer::new(config.port, router).serve().await;

    reconciler.shutdown();
    scheduler.shutdown();

    result.map_err(|e| anyhow::anyhow!("{e}"))
}
