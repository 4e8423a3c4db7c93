//! Instance lifecycle manager
//!
//! Provisions working trees from templates or uploads, wires containers,
//! drives the start/stop/restart/reinstall state machine with a readiness
//! prober, and exposes the file-tree, settings, player and dashboard
//! operations the HTTP surface calls into.
//!
//! Failure semantics: any provisioning step that fails before the catalogue
//! insert rolls back what was already created (working tree, container).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use ender_runtime::{
    ContainerRuntime, ContainerSpec, RuntimeError, MANAGED_LABEL, SERVER_ID_LABEL,
};
use ender_store::{
    DashboardStats, EventLevel, FileInfo, OnlinePlayer, Server, ServerSettings, ServerStatus,
    ServerStore, Template, TemplateStore,
};

use crate::bus::Hub;
use crate::command::CommandBroker;
use crate::error::{ManagerError, Result};
use crate::events::EventLog;
use crate::message::{ConsoleSource, Frame};
use crate::ports::{find_available_port, GAME_PORT_BASE, RCON_PORT_BASE};
use crate::provision;
use crate::rcon::RconDialer;

/// Extra container memory on top of the instance's configured maximum.
pub const MEMORY_OVERHEAD_MB: i64 = 512;

const READINESS_TIMEOUT: Duration = Duration::from_secs(180);
const READINESS_POLL: Duration = Duration::from_secs(5);
const STOP_GRACE: Duration = Duration::from_secs(10);
const REINSTALL_GRACE: Duration = Duration::from_secs(5);

/// Operator-requested lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    Start,
    Stop,
    Restart,
    Reinstall,
}

impl std::str::FromStr for ServerAction {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(ServerAction::Start),
            "stop" => Ok(ServerAction::Stop),
            "restart" => Ok(ServerAction::Restart),
            "reinstall" => Ok(ServerAction::Reinstall),
            other => Err(ManagerError::InvalidInput(format!(
                "unknown action: {other}"
            ))),
        }
    }
}

/// Host RAM versus RAM handed out to instances.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemResources {
    #[serde(rename = "totalRAM")]
    pub total_ram_mb: i64,
    #[serde(rename = "allocatedRAM")]
    pub allocated_ram_mb: i64,
}

/// Owns instance lifecycle state. Cheap to clone; background tasks (the
/// readiness prober) run on clones.
#[derive(Clone)]
pub struct ServerManager {
    servers: ServerStore,
    templates: TemplateStore,
    runtime: Arc<dyn ContainerRuntime>,
    hub: Arc<Hub>,
    events: EventLog,
    broker: CommandBroker,
    dialer: Arc<dyn RconDialer>,
    data_root: PathBuf,
}

impl ServerManager {
    pub fn new(
        servers: ServerStore,
        templates: TemplateStore,
        runtime: Arc<dyn ContainerRuntime>,
        hub: Arc<Hub>,
        events: EventLog,
        dialer: Arc<dyn RconDialer>,
        data_root: PathBuf,
    ) -> Self {
        let broker = CommandBroker::new(servers.clone(), runtime.clone(), dialer.clone());
        Self {
            servers,
            templates,
            runtime,
            hub,
            events,
            broker,
            dialer,
            data_root,
        }
    }

    pub async fn list(&self) -> Result<Vec<Server>> {
        Ok(self.servers.list().await?)
    }

    pub async fn get(&self, id: &str) -> Result<Server> {
        Ok(self.servers.get(id).await?)
    }

    /// Create a fully provisioned, offline instance from a template.
    pub async fn create_from_template(&self, name: &str, template_id: &str) -> Result<Server> {
        let template = self.templates.get(template_id).await?;

        let mut server = Server::new(Uuid::new_v4().to_string(), name.to_string());
        server.minecraft_version = template.minecraft_version.clone();
        server.java_version = template.java_version.clone();
        server.template_id = Some(template.id.clone());
        server.rcon_password = format!("ender-rcon-{}", Uuid::new_v4());
        server.max_memory_mb = template.max_memory_mb;
        if let Some(max_players) = template
            .properties
            .get("max-players")
            .and_then(|v| v.parse().ok())
        {
            server.players.max = max_players;
        }

        let data_path = self.instance_dir(&server.id)?;
        server.data_path = data_path.to_string_lossy().into_owned();

        let result = self
            .provision_from_template(&mut server, &template, &data_path)
            .await;

        match result {
            Ok(()) => {
                let created = self.servers.get(&server.id).await?;
                self.broadcast_update(&created);
                self.events
                    .emit(
                        "server.create",
                        EventLevel::Info,
                        format!("Server '{}' was created successfully.", created.name),
                        Some(&created.id),
                    )
                    .await;
                tracing::info!(server_id = %created.id, template = %template.name,
                    container_id = %created.docker_container_id, "created server from template");
                Ok(created)
            }
            Err(e) => {
                self.rollback_provisioning(&server).await;
                Err(e)
            }
        }
    }

    /// Create an instance seeded from an uploaded archive already staged on
    /// disk.
    pub async fn create_from_upload(
        &self,
        name: &str,
        java_version: &str,
        entrypoint: &str,
        max_memory_mb: i64,
        archive: &Path,
    ) -> Result<Server> {
        let mut server = Server::new(Uuid::new_v4().to_string(), name.to_string());
        server.minecraft_version = "Uploaded".to_string();
        server.java_version = java_version.to_string();
        server.rcon_password = format!("ender-rcon-{}", Uuid::new_v4());
        server.max_memory_mb = max_memory_mb;

        let data_path = self.instance_dir(&server.id)?;
        server.data_path = data_path.to_string_lossy().into_owned();

        let result = self
            .provision_from_upload(&mut server, entrypoint, archive, &data_path)
            .await;

        match result {
            Ok(()) => {
                let created = self.servers.get(&server.id).await?;
                self.broadcast_update(&created);
                self.events
                    .emit(
                        "server.upload",
                        EventLevel::Info,
                        format!("Server '{}' was created from an upload.", created.name),
                        Some(&created.id),
                    )
                    .await;
                Ok(created)
            }
            Err(e) => {
                self.rollback_provisioning(&server).await;
                Err(e)
            }
        }
    }

    /// Update descriptive fields only.
    pub async fn update(
        &self,
        id: &str,
        name: &str,
        minecraft_version: &str,
        java_version: &str,
        players_max: i64,
    ) -> Result<Server> {
        self.servers
            .update_descriptive(id, name, minecraft_version, java_version, players_max)
            .await?;
        let updated = self.servers.get(id).await?;
        self.broadcast_update(&updated);
        Ok(updated)
    }

    /// Tear down container, working tree and catalogue row. Succeeds even if
    /// the container is already gone.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let server = self.servers.get(id).await?;

        if !server.docker_container_id.is_empty() {
            let _ = self
                .runtime
                .stop_container(&server.docker_container_id, STOP_GRACE)
                .await;
            match self
                .runtime
                .remove_container(&server.docker_container_id)
                .await
            {
                Ok(()) | Err(RuntimeError::NotFound { .. }) => {}
                Err(e) => {
                    tracing::warn!(server_id = %id, error = %e,
                        "could not remove container during server deletion");
                }
            }
        }

        self.servers.delete(id).await?;

        if let Err(e) = fs::remove_dir_all(&server.data_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(server_id = %id, path = %server.data_path, error = %e,
                    "failed to delete server data directory");
            }
        }

        self.events
            .emit(
                "server.delete",
                EventLevel::Warn,
                format!("Server '{}' was permanently deleted.", server.name),
                None,
            )
            .await;
        self.hub.broadcast(&Frame::server_deleted(id));
        Ok(())
    }

    /// Drive the state machine: start, stop, restart, reinstall.
    pub async fn perform_action(&self, id: &str, action: &str) -> Result<()> {
        let action: ServerAction = action.parse()?;
        let server = self.servers.get(id).await?;
        let container_id = server.docker_container_id.clone();

        tracing::info!(server_id = %id, container_id = %container_id, action = ?action,
            "performing server action");

        let (new_status, probe) = match action {
            ServerAction::Start => {
                self.runtime.start_container(&container_id).await?;
                self.events
                    .emit(
                        "server.start",
                        EventLevel::Info,
                        format!("Server '{}' is starting.", server.name),
                        Some(id),
                    )
                    .await;
                (ServerStatus::Starting, true)
            }
            ServerAction::Stop => {
                self.servers.set_status(id, ServerStatus::Stopping).await?;
                if let Err(e) = self.runtime.stop_container(&container_id, STOP_GRACE).await {
                    self.servers.set_status(id, server.status).await?;
                    return Err(e.into());
                }
                self.events
                    .emit(
                        "server.stop",
                        EventLevel::Info,
                        format!("Server '{}' was stopped.", server.name),
                        Some(id),
                    )
                    .await;
                (ServerStatus::Offline, false)
            }
            ServerAction::Restart => {
                self.runtime.restart_container(&container_id).await?;
                self.events
                    .emit(
                        "server.restart",
                        EventLevel::Info,
                        format!("Server '{}' is restarting.", server.name),
                        Some(id),
                    )
                    .await;
                (ServerStatus::Starting, true)
            }
            ServerAction::Reinstall => {
                self.reinstall(&server).await?;
                (ServerStatus::Starting, true)
            }
        };

        self.servers.set_status(id, new_status).await?;
        let updated = self.servers.get(id).await?;
        self.broadcast_update(&updated);

        if probe {
            self.spawn_readiness_probe(updated);
        }
        Ok(())
    }

    /// Stop, wipe the working tree's top-level entries, start again.
    async fn reinstall(&self, server: &Server) -> Result<()> {
        let container_id = &server.docker_container_id;

        if let Err(e) = self.runtime.stop_container(container_id, STOP_GRACE).await {
            tracing::warn!(server_id = %server.id, error = %e,
                "container did not stop cleanly before reinstall");
        }
        tokio::time::sleep(REINSTALL_GRACE).await;

        let data_path = PathBuf::from(&server.data_path);
        tokio::task::spawn_blocking(move || provision::clear_dir(&data_path))
            .await
            .map_err(|e| ManagerError::Internal(e.to_string()))??;

        self.runtime.start_container(container_id).await?;

        self.events
            .emit(
                "server.reinstall",
                EventLevel::Warn,
                format!("Server '{}' is being reinstalled.", server.name),
                Some(&server.id),
            )
            .await;
        Ok(())
    }

    /// Run a command over the instance's remote console.
    pub async fn send_command(&self, id: &str, command: &str) -> Result<String> {
        self.broker.send_command(id, command).await
    }

    /// Run a shell line inside the instance's container.
    pub async fn exec_terminal(&self, id: &str, command: &str) -> Result<String> {
        self.broker.exec_terminal(id, command).await
    }

    /// Pump container log lines into a session outbox until the stream ends
    /// or the session detaches.
    pub async fn stream_logs(&self, server_id: &str, outbox: mpsc::Sender<Vec<u8>>) {
        let server = match self.servers.get(server_id).await {
            Ok(server) => server,
            Err(e) => {
                tracing::warn!(server_id = %server_id, error = %e,
                    "cannot stream logs, server not found");
                send_frame(&outbox, &Frame::error(e.to_string())).await;
                return;
            }
        };

        let mut stream = match self.runtime.follow_logs(&server.docker_container_id).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(server_id = %server_id, error = %e,
                    "failed to get container logs");
                send_frame(&outbox, &Frame::error(format!("Failed to get container logs: {e}")))
                    .await;
                return;
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(line) => {
                    let frame = Frame::console_output(ConsoleSource::Docker, "", line);
                    let Some(bytes) = frame.encode() else { continue };
                    if outbox.send(bytes).await.is_err() {
                        tracing::info!(server_id = %server_id,
                            "session detached, stopping log stream");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(server_id = %server_id, error = %e,
                        "error reading logs from container");
                    return;
                }
            }
        }
    }

    /// List entries of a directory inside the working tree.
    pub async fn list_files(&self, id: &str, path: &str) -> Result<Vec<FileInfo>> {
        let server = self.servers.get(id).await?;
        let root = PathBuf::from(&server.data_path);
        let full = provision::safe_join(&root, path)?;

        let mut infos = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(file = ?entry.file_name(), error = %e,
                        "could not stat file during listing");
                    continue;
                }
            };
            let modified = meta
                .modified()
                .map(chrono::DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            infos.push(FileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len() as i64,
                is_dir: meta.is_dir(),
                modified,
            });
        }
        Ok(infos)
    }

    /// Read one file inside the working tree.
    pub async fn file_content(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let server = self.servers.get(id).await?;
        let root = PathBuf::from(&server.data_path);
        let full = provision::safe_join(&root, path)?;
        Ok(fs::read(full)?)
    }

    /// Replace one file inside the working tree, atomically.
    pub async fn update_file(&self, id: &str, path: &str, content: &[u8]) -> Result<()> {
        let server = self.servers.get(id).await?;
        let root = PathBuf::from(&server.data_path);
        let full = provision::safe_join(&root, path)?;
        provision::write_file_atomic(&full, content)
    }

    /// Parsed `server.properties`; empty when the file does not exist yet.
    pub async fn settings(&self, id: &str) -> Result<ServerSettings> {
        match self.file_content(id, "server.properties").await {
            Ok(content) => Ok(provision::parse_properties(&String::from_utf8_lossy(
                &content,
            ))),
            Err(ManagerError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(ServerSettings::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Replace `server.properties` with the supplied map (header comment
    /// prepended) and restart the instance.
    pub async fn update_settings(&self, id: &str, settings: &ServerSettings) -> Result<()> {
        let server = self.servers.get(id).await?;

        let mut content = String::from("# Minecraft server properties\n");
        content.push_str(&format!("# Updated on {}\n", Utc::now().to_rfc2822()));
        content.push_str(&provision::serialize_properties(settings));

        self.update_file(id, "server.properties", content.as_bytes())
            .await?;

        self.events
            .emit(
                "server.settings.update",
                EventLevel::Info,
                format!(
                    "Settings for server '{}' were updated. Restart is in progress.",
                    server.name
                ),
                Some(id),
            )
            .await;

        self.perform_action(id, "restart").await
    }

    /// Fleet-wide dashboard aggregation.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let servers = self.servers.list().await?;

        let mut stats = DashboardStats {
            total_servers: servers.len() as i64,
            system_health: 99.5,
            ..Default::default()
        };

        for server in &servers {
            if server.status == ServerStatus::Online {
                stats.online_servers += 1;
                stats.total_players += server.players.current;
            }
            stats.max_players += server.players.max;
            *stats
                .server_status_dist
                .entry(server.status.to_string())
                .or_default() += 1;
        }

        stats.resource_history = self
            .servers
            .history_summary(Utc::now() - chrono::Duration::hours(24))
            .await?;
        stats.player_history = stats.resource_history.clone();
        Ok(stats)
    }

    /// Recent resource samples for one instance.
    pub async fn resource_history(&self, id: &str) -> Result<Vec<ender_store::ResourceDataPoint>> {
        self.servers.get(id).await?;
        Ok(self
            .servers
            .history_for(id, Utc::now() - chrono::Duration::minutes(30))
            .await?)
    }

    /// Players currently connected, via the engine's `list` command.
    pub async fn online_players(&self, id: &str) -> Result<Vec<OnlinePlayer>> {
        let response = self.send_command(id, "list").await?;
        Ok(parse_player_list(&response))
    }

    /// Kick or ban a player, recording the action in the event log.
    pub async fn manage_player(
        &self,
        id: &str,
        action: &str,
        player: &str,
        reason: &str,
    ) -> Result<()> {
        let (command, past_tense) = match action {
            "kick" => (format!("kick {player} {reason}"), "kicked"),
            "ban" => (format!("ban {player} {reason}"), "banned"),
            other => {
                return Err(ManagerError::InvalidInput(format!(
                    "unsupported player action: {other}"
                )))
            }
        };

        self.send_command(id, command.trim()).await?;
        self.events
            .emit(
                &format!("player.{action}"),
                EventLevel::Info,
                format!("Player '{player}' was {past_tense}."),
                Some(id),
            )
            .await;
        Ok(())
    }

    /// Host RAM versus RAM promised to instances (including overhead).
    pub async fn system_resource_stats(&self) -> Result<SystemResources> {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let total_ram_mb = (sys.total_memory() / 1024 / 1024) as i64;

        let servers = self.servers.list().await?;
        let allocated_ram_mb = servers
            .iter()
            .map(|s| s.max_memory_mb + MEMORY_OVERHEAD_MB)
            .sum();

        Ok(SystemResources {
            total_ram_mb,
            allocated_ram_mb,
        })
    }

    fn instance_dir(&self, id: &str) -> Result<PathBuf> {
        let path = self.data_root.join(id);
        if !path.is_absolute() || !path.starts_with(&self.data_root) {
            return Err(ManagerError::Provisioning(format!(
                "working tree escapes data root: {}",
                path.display()
            )));
        }
        Ok(path)
    }

    async fn provision_from_template(
        &self,
        server: &mut Server,
        template: &Template,
        data_path: &Path,
    ) -> Result<()> {
        fs::create_dir_all(data_path)?;

        if let Some(archive) = &template.archive_path {
            let archive = PathBuf::from(archive);
            let dest = data_path.to_path_buf();
            tokio::task::spawn_blocking(move || crate::archive::unpack_into(&archive, &dest))
                .await
                .map_err(|e| ManagerError::Internal(e.to_string()))?
                .map_err(|e| ManagerError::Provisioning(e.to_string()))?;
        } else {
            let declared: ServerSettings = template
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            fs::write(
                data_path.join("server.properties"),
                provision::serialize_properties(&declared),
            )?;
        }

        match &template.startup_command {
            Some(command) => provision::write_start_script_command(data_path, command)?,
            None => provision::write_start_script(data_path, "server.jar", template.max_memory_mb)?,
        }
        provision::write_eula(data_path)?;
        provision::ensure_rcon_in_properties(
            &data_path.join("server.properties"),
            &server.rcon_password,
        )?;

        let image = format!("eclipse-temurin:{}-jdk", template.java_version);
        self.provision_container(server, &image, data_path).await?;

        self.servers.insert(server).await?;
        Ok(())
    }

    async fn provision_from_upload(
        &self,
        server: &mut Server,
        entrypoint: &str,
        archive: &Path,
        data_path: &Path,
    ) -> Result<()> {
        fs::create_dir_all(data_path)?;

        let archive = archive.to_path_buf();
        let dest = data_path.to_path_buf();
        tokio::task::spawn_blocking(move || crate::archive::unpack_into(&archive, &dest))
            .await
            .map_err(|e| ManagerError::Internal(e.to_string()))?
            .map_err(|e| ManagerError::Provisioning(e.to_string()))?;

        provision::write_eula(data_path)?;
        provision::write_start_script(data_path, entrypoint, server.max_memory_mb)?;
        provision::ensure_rcon_in_properties(
            &data_path.join("server.properties"),
            &server.rcon_password,
        )?;

        let image = format!("eclipse-temurin:{}-jdk", server.java_version);
        self.provision_container(server, &image, data_path).await?;

        self.servers.insert(server).await?;
        Ok(())
    }

    /// Ensure the image, allocate ports, create the container. A port
    /// conflict at creation re-allocates and retries once.
    async fn provision_container(
        &self,
        server: &mut Server,
        image: &str,
        data_path: &Path,
    ) -> Result<()> {
        self.runtime.ensure_image(image).await?;

        let (game_port, rcon_port) = allocate_port_pair()?;
        let mut spec = ContainerSpec {
            name: format!("enderdeploy_{}", server.id),
            image: image.to_string(),
            data_path: data_path.to_path_buf(),
            game_port,
            rcon_port,
            memory_limit_mb: server.max_memory_mb + MEMORY_OVERHEAD_MB,
            labels: HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (SERVER_ID_LABEL.to_string(), server.id.clone()),
            ]),
            cmd: vec!["/bin/sh".to_string(), "start.sh".to_string()],
        };

        let container_id = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(e) if e.is_port_conflict() => {
                tracing::warn!(server_id = %server.id, error = %e,
                    "port conflict at container creation, re-allocating");
                let (game_port, rcon_port) = allocate_port_pair()?;
                spec.game_port = game_port;
                spec.rcon_port = rcon_port;
                self.runtime.create_container(&spec).await?
            }
            Err(e) => return Err(e.into()),
        };

        server.port = spec.game_port as i64;
        server.ip_address = format!("127.0.0.1:{}", spec.game_port);
        server.docker_container_id = container_id;
        Ok(())
    }

    /// Best-effort compensation for a failed provisioning run.
    async fn rollback_provisioning(&self, server: &Server) {
        if !server.docker_container_id.is_empty() {
            if let Err(e) = self
                .runtime
                .remove_container(&server.docker_container_id)
                .await
            {
                tracing::warn!(server_id = %server.id, error = %e,
                    "failed to remove container while rolling back provisioning");
            }
        }
        if !server.data_path.is_empty() {
            if let Err(e) = fs::remove_dir_all(&server.data_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(server_id = %server.id, error = %e,
                        "failed to remove working tree while rolling back provisioning");
                }
            }
        }
    }

    fn broadcast_update(&self, server: &Server) {
        self.hub.broadcast(&Frame::server_update(server.clone()));
    }

    fn spawn_readiness_probe(&self, server: Server) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.poll_for_ready(server).await;
        });
    }

    /// Drive `starting -> online` by probing the remote console; this task
    /// owns that transition exclusively.
    async fn poll_for_ready(&self, server: Server) {
        tracing::info!(server_id = %server.id, "starting readiness probe");

        enum Outcome {
            Online,
            Stopped,
            Abandoned,
        }

        let outcome = tokio::time::timeout(READINESS_TIMEOUT, async {
            let mut ticker = tokio::time::interval(READINESS_POLL);
            loop {
                ticker.tick().await;
                match self
                    .runtime
                    .inspect_container(&server.docker_container_id)
                    .await
                {
                    Ok(status) if status.running => {
                        let Some(port) = status.rcon_host_port else {
                            tracing::warn!(server_id = %server.id,
                                "rcon port not bound, cannot probe readiness");
                            return Outcome::Abandoned;
                        };
                        let addr = format!("127.0.0.1:{port}");
                        if self
                            .dialer
                            .probe(&addr, &server.rcon_password)
                            .await
                            .is_ok()
                        {
                            return Outcome::Online;
                        }
                        tracing::debug!(server_id = %server.id, addr = %addr,
                            "rcon not ready yet, retrying");
                    }
                    _ => return Outcome::Stopped,
                }
            }
        })
        .await;

        match outcome {
            Ok(Outcome::Online) => {
                tracing::info!(server_id = %server.id, "rcon reachable, server is online");
                if let Err(e) = self.servers.set_status(&server.id, ServerStatus::Online).await {
                    tracing::error!(server_id = %server.id, error = %e,
                        "failed to mark server online after readiness");
                    return;
                }
                if let Ok(updated) = self.servers.get(&server.id).await {
                    self.broadcast_update(&updated);
                }
                self.events
                    .emit(
                        "server.start.ready",
                        EventLevel::Info,
                        format!("Server '{}' is fully loaded and online.", server.name),
                        Some(&server.id),
                    )
                    .await;
            }
            Ok(Outcome::Stopped) => {
                tracing::warn!(server_id = %server.id,
                    "container stopped during readiness probe, marking offline");
                let _ = self
                    .servers
                    .set_status(&server.id, ServerStatus::Offline)
                    .await;
                if let Ok(updated) = self.servers.get(&server.id).await {
                    self.broadcast_update(&updated);
                }
            }
            Ok(Outcome::Abandoned) => {}
            Err(_) => {
                tracing::warn!(server_id = %server.id,
                    "readiness probe timed out, server failed to start properly");
                let _ = self
                    .servers
                    .set_status(&server.id, ServerStatus::Offline)
                    .await;
                if let Ok(updated) = self.servers.get(&server.id).await {
                    self.broadcast_update(&updated);
                }
                self.events
                    .emit(
                        "server.start.fail",
                        EventLevel::Error,
                        format!("Server '{}' failed to become ready in time.", server.name),
                        Some(&server.id),
                    )
                    .await;
            }
        }
    }
}

fn allocate_port_pair() -> Result<(u16, u16)> {
    let game_port = find_available_port(GAME_PORT_BASE)?;
    let mut rcon_port = find_available_port(RCON_PORT_BASE)?;
    if rcon_port == game_port {
        rcon_port = find_available_port(rcon_port + 1)?;
    }
    Ok((game_port, rcon_port))
}

/// Parse the engine's `list` response ("There are N of M players online:
/// a, b") into player entries.
fn parse_player_list(response: &str) -> Vec<OnlinePlayer> {
    let Some((_, names)) = response.split_once(':') else {
        return Vec::new();
    };
    let names = names.trim();
    if names.is_empty() {
        return Vec::new();
    }
    names
        .split(", ")
        .map(|name| OnlinePlayer {
            name: name.to_string(),
            uuid: name.to_string(),
        })
        .collect()
}

async fn send_frame(outbox: &mpsc::Sender<Vec<u8>>, frame: &Frame) {
    if let Some(bytes) = frame.encode() {
        let _ = outbox.send(bytes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcon::RconError;
    use async_trait::async_trait;
    use ender_runtime::MockRuntime;
    use ender_store::{connect_in_memory, EventStore};
    use std::collections::HashMap as StdHashMap;
    use tempfile::TempDir;

    struct AlwaysReadyDialer;

    #[async_trait]
    impl RconDialer for AlwaysReadyDialer {
        async fn probe(&self, _addr: &str, _password: &str) -> Result<(), RconError> {
            Ok(())
        }
        async fn execute(
            &self,
            _addr: &str,
            _password: &str,
            command: &str,
        ) -> Result<String, RconError> {
            Ok(format!("ran: {command}"))
        }
    }

    struct NeverReadyDialer;

    #[async_trait]
    impl RconDialer for NeverReadyDialer {
        async fn probe(&self, _addr: &str, _password: &str) -> Result<(), RconError> {
            Err(RconError::Protocol("connection refused".to_string()))
        }
        async fn execute(
            &self,
            _addr: &str,
            _password: &str,
            _command: &str,
        ) -> Result<String, RconError> {
            Err(RconError::Protocol("connection refused".to_string()))
        }
    }

    struct Fixture {
        manager: ServerManager,
        runtime: Arc<MockRuntime>,
        servers: ServerStore,
        events: EventStore,
        _data_root: TempDir,
    }

    async fn fixture(dialer: Arc<dyn RconDialer>) -> Fixture {
        let pool = connect_in_memory().await.unwrap();
        let servers = ServerStore::new(pool.clone());
        let templates = TemplateStore::new(pool.clone());
        let events_store = EventStore::new(pool);
        let runtime = Arc::new(MockRuntime::new());
        let data_root = TempDir::new().unwrap();

        templates
            .insert(&Template {
                id: "t1".to_string(),
                name: "Vanilla".to_string(),
                description: String::new(),
                minecraft_version: "1.21".to_string(),
                java_version: "21".to_string(),
                server_type: "Vanilla".to_string(),
                min_memory_mb: 1024,
                max_memory_mb: 2048,
                tags: vec![],
                jvm_args: vec![],
                properties: StdHashMap::from([
                    ("max-players".to_string(), "32".to_string()),
                    ("motd".to_string(), "Hello".to_string()),
                ]),
                archive_path: None,
                startup_command: None,
            })
            .await
            .unwrap();

        let manager = ServerManager::new(
            servers.clone(),
            templates,
            runtime.clone(),
            Arc::new(Hub::new()),
            EventLog::new(events_store.clone()),
            dialer,
            data_root.path().to_path_buf(),
        );

        Fixture {
            manager,
            runtime,
            servers,
            events: events_store,
            _data_root: data_root,
        }
    }

    #[tokio::test]
    async fn test_create_from_template_provisions_working_tree() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();

        assert_eq!(server.status, ServerStatus::Offline);
        assert_eq!(server.players.max, 32);
        assert!(server.port >= 25565);
        assert!(!server.rcon_password.is_empty());
        assert!(!server.docker_container_id.is_empty());

        let data_path = PathBuf::from(&server.data_path);
        assert_eq!(
            fs::read_to_string(data_path.join("eula.txt")).unwrap(),
            "eula=true\n"
        );
        assert!(data_path.join("start.sh").exists());

        let props = provision::parse_properties(
            &fs::read_to_string(data_path.join("server.properties")).unwrap(),
        );
        assert_eq!(props.get("enable-rcon").unwrap(), "true");
        assert_eq!(props.get("rcon.port").unwrap(), "25575");
        assert_eq!(props.get("rcon.password").unwrap(), &server.rcon_password);
        assert_eq!(props.get("motd").unwrap(), "Hello");

        // The container spec matched the instance.
        let spec = fx
            .runtime
            .container_spec(&server.docker_container_id)
            .await
            .unwrap();
        assert_eq!(spec.memory_limit_mb, 2048 + MEMORY_OVERHEAD_MB);
        assert_eq!(spec.labels.get(MANAGED_LABEL).unwrap(), "true");
        assert_eq!(spec.labels.get(SERVER_ID_LABEL).unwrap(), &server.id);
    }

    #[tokio::test]
    async fn test_create_missing_template_rejected() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        let err = fx
            .manager
            .create_from_template("s1", "ghost")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_container_failure() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        fx.runtime
            .fail_next_create(RuntimeError::CreateFailed {
                reason: "no such image".to_string(),
            })
            .await;

        let err = fx.manager.create_from_template("s1", "t1").await;
        assert!(err.is_err());

        // No catalogue row, no leftover working tree.
        assert!(fx.servers.list().await.unwrap().is_empty());
        assert_eq!(fs::read_dir(fx._data_root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_create_retries_on_port_conflict() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        fx.runtime
            .fail_next_create(RuntimeError::CreateFailed {
                reason: "Bind failed: port is already allocated".to_string(),
            })
            .await;

        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();
        assert!(!server.docker_container_id.is_empty());
        assert_eq!(fx.runtime.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reaches_online_via_probe() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();

        fx.manager.perform_action(&server.id, "start").await.unwrap();

        // The probe flips starting -> online once the dialer answers; the
        // intermediate status is not asserted because the probe races ahead
        // with an always-ready console.
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if fx.servers.get(&server.id).await.unwrap().status == ServerStatus::Online {
                break;
            }
        }
        assert_eq!(
            fx.servers.get(&server.id).await.unwrap().status,
            ServerStatus::Online
        );

        let events = fx.events.recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.kind == "server.start"));
        assert!(events.iter().any(|e| e.kind == "server.start.ready"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_marks_offline() {
        let fx = fixture(Arc::new(NeverReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();
        fx.runtime
            .start_container(&server.docker_container_id)
            .await
            .unwrap();
        fx.servers
            .set_status(&server.id, ServerStatus::Starting)
            .await
            .unwrap();

        let starting = fx.servers.get(&server.id).await.unwrap();
        fx.manager.poll_for_ready(starting).await;

        assert_eq!(
            fx.servers.get(&server.id).await.unwrap().status,
            ServerStatus::Offline
        );
        let events = fx.events.recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.kind == "server.start.fail"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_stops_when_container_dies() {
        let fx = fixture(Arc::new(NeverReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();
        fx.servers
            .set_status(&server.id, ServerStatus::Starting)
            .await
            .unwrap();

        // Container exists but is not running.
        let starting = fx.servers.get(&server.id).await.unwrap();
        fx.manager.poll_for_ready(starting).await;

        assert_eq!(
            fx.servers.get(&server.id).await.unwrap().status,
            ServerStatus::Offline
        );
        // No timeout event; the container death path is not a start failure.
        let events = fx.events.recent(10).await.unwrap();
        assert!(!events.iter().any(|e| e.kind == "server.start.fail"));
    }

    #[tokio::test]
    async fn test_delete_tears_everything_down() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();
        let container_id = server.docker_container_id.clone();

        fx.manager.delete(&server.id).await.unwrap();

        assert!(fx.servers.list().await.unwrap().is_empty());
        assert!(!fx.runtime.contains(&container_id).await);
        assert!(!PathBuf::from(&server.data_path).exists());
    }

    #[tokio::test]
    async fn test_invalid_action_rejected() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();
        let err = fx
            .manager
            .perform_action(&server.id, "explode")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_file_access_guards_traversal() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();

        assert!(matches!(
            fx.manager.file_content(&server.id, "../secrets").await,
            Err(ManagerError::InvalidInput(_))
        ));

        let content = fx
            .manager
            .file_content(&server.id, "eula.txt")
            .await
            .unwrap();
        assert_eq!(content, b"eula=true\n");

        let files = fx.manager.list_files(&server.id, "").await.unwrap();
        assert!(files.iter().any(|f| f.name == "start.sh"));
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        // A dialer that never answers keeps the restart probe from racing
        // the status assertion below.
        let fx = fixture(Arc::new(NeverReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();

        let mut settings = ServerSettings::new();
        settings.insert("motd".to_string(), "A new world".to_string());
        settings.insert("difficulty".to_string(), "hard".to_string());

        fx.manager
            .update_settings(&server.id, &settings)
            .await
            .unwrap();

        // Restart path set the server starting.
        assert_eq!(
            fx.servers.get(&server.id).await.unwrap().status,
            ServerStatus::Starting
        );

        let read_back = fx.manager.settings(&server.id).await.unwrap();
        assert_eq!(read_back, settings);
    }

    #[tokio::test]
    async fn test_update_descriptive_fields() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();

        let updated = fx
            .manager
            .update(&server.id, "renamed", "1.21.1", "21", 64)
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.players.max, 64);
        // Lifecycle fields untouched.
        assert_eq!(updated.docker_container_id, server.docker_container_id);
    }

    #[tokio::test]
    async fn test_dashboard_stats_counts() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        let a = fx.manager.create_from_template("a", "t1").await.unwrap();
        let _b = fx.manager.create_from_template("b", "t1").await.unwrap();
        fx.servers
            .set_status(&a.id, ServerStatus::Online)
            .await
            .unwrap();

        let stats = fx.manager.dashboard_stats().await.unwrap();
        assert_eq!(stats.total_servers, 2);
        assert_eq!(stats.online_servers, 1);
        assert_eq!(stats.max_players, 64);
        assert_eq!(*stats.server_status_dist.get("online").unwrap(), 1);
        assert_eq!(*stats.server_status_dist.get("offline").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_manage_player_rejects_unknown_action() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;
        let server = fx.manager.create_from_template("s1", "t1").await.unwrap();
        assert!(matches!(
            fx.manager
                .manage_player(&server.id, "teleport", "steve", "")
                .await,
            Err(ManagerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_parse_player_list() {
        let players = parse_player_list("There are 2 of a max of 20 players online: alice, bob");
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "alice");
        assert_eq!(players[1].name, "bob");

        assert!(parse_player_list("There are 0 of a max of 20 players online:").is_empty());
        assert!(parse_player_list("garbage without colon").is_empty());
    }

    #[tokio::test]
    async fn test_create_from_upload() {
        let fx = fixture(Arc::new(AlwaysReadyDialer)).await;

        // Stage an uploaded archive containing a world and a jar.
        let staging = TempDir::new().unwrap();
        let tree = staging.path().join("tree");
        fs::create_dir_all(tree.join("world")).unwrap();
        fs::write(tree.join("custom.jar"), b"jar").unwrap();
        fs::write(tree.join("world/level.dat"), b"data").unwrap();
        let archive = staging.path().join("upload.zip");
        crate::archive::pack_dir(&tree, &archive).unwrap();

        let server = fx
            .manager
            .create_from_upload("uploaded", "17", "custom.jar", 4096, &archive)
            .await
            .unwrap();

        assert_eq!(server.minecraft_version, "Uploaded");
        assert_eq!(server.java_version, "17");
        let data_path = PathBuf::from(&server.data_path);
        assert!(data_path.join("custom.jar").exists());
        assert!(data_path.join("world/level.dat").exists());
        let start = fs::read_to_string(data_path.join("start.sh")).unwrap();
        assert!(start.contains("-Xmx4096M"));
        assert!(start.contains("custom.jar"));
    }
}
