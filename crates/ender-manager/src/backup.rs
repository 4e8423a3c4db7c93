//! Backup engine
//!
//! Consistent zip snapshots of an instance's working tree. When the
//! instance is online the engine brackets the archive walk in the engine's
//! write barrier: `save-off` before, `save-on` after — released on every
//! exit path via [`SaveGuard`].

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use ender_store::{Backup, BackupStore, EventLevel, Server, ServerStatus, ServerStore};

use crate::archive;
use crate::error::{ManagerError, Result};
use crate::events::EventLog;
use crate::lifecycle::ServerManager;

/// Time the engine gets to flush after `save-all`.
const FLUSH_WAIT: Duration = Duration::from_secs(5);

/// Grace after issuing `stop` before wiping the tree on restore.
const RESTORE_STOP_GRACE: Duration = Duration::from_secs(10);

/// Re-enables world saving when dropped, so no exit path of the create
/// procedure can leave the barrier held.
struct SaveGuard {
    manager: ServerManager,
    server_id: String,
    released: bool,
}

impl SaveGuard {
    fn new(manager: ServerManager, server_id: &str) -> Self {
        Self {
            manager,
            server_id: server_id.to_string(),
            released: false,
        }
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.manager.send_command(&self.server_id, "save-on").await {
            tracing::warn!(server_id = %self.server_id, error = %e,
                "failed to re-enable world saving after backup");
        }
    }
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        if !self.released {
            let manager = self.manager.clone();
            let server_id = self.server_id.clone();
            tokio::spawn(async move {
                let _ = manager.send_command(&server_id, "save-on").await;
            });
        }
    }
}

/// Creates, restores and deletes working-tree snapshots.
#[derive(Clone)]
pub struct BackupEngine {
    servers: ServerStore,
    backups: BackupStore,
    events: EventLog,
    manager: ServerManager,
    backup_root: PathBuf,
}

impl BackupEngine {
    pub fn new(
        servers: ServerStore,
        backups: BackupStore,
        events: EventLog,
        manager: ServerManager,
        backup_root: PathBuf,
    ) -> Self {
        Self {
            servers,
            backups,
            events,
            manager,
            backup_root,
        }
    }

    pub async fn list_for_server(&self, server_id: &str) -> Result<Vec<Backup>> {
        self.servers.get(server_id).await?;
        Ok(self.backups.list_for_server(server_id).await?)
    }

    pub async fn get(&self, backup_id: &str) -> Result<Backup> {
        Ok(self.backups.get(backup_id).await?)
    }

    /// Create a consistent snapshot. Online instances are quiesced over the
    /// remote console first.
    pub async fn create(&self, server_id: &str, name: &str) -> Result<Backup> {
        let server = self.servers.get(server_id).await?;

        if server.status == ServerStatus::Online {
            tracing::info!(server_id = %server_id,
                "server is online, quiescing saves for backup");

            // A failing save-off is a warning, not fatal.
            if let Err(e) = self.manager.send_command(server_id, "save-off").await {
                tracing::warn!(server_id = %server_id, error = %e,
                    "failed to send save-off before backup, continuing anyway");
            }

            let mut guard = SaveGuard::new(self.manager.clone(), server_id);
            let result = self.flush_and_archive(&server, name).await;
            guard.release().await;
            result
        } else {
            self.write_archive(&server, name).await
        }
    }

    async fn flush_and_archive(&self, server: &Server, name: &str) -> Result<Backup> {
        self.manager.send_command(&server.id, "save-all").await?;
        tokio::time::sleep(FLUSH_WAIT).await;
        self.write_archive(server, name).await
    }

    async fn write_archive(&self, server: &Server, name: &str) -> Result<Backup> {
        let file_name = format!("{}_{}.zip", server.id, Utc::now().format("%Y%m%d%H%M%S"));
        let path = self.backup_root.join(file_name);

        let data_path = PathBuf::from(&server.data_path);
        let archive_path = path.clone();
        tokio::task::spawn_blocking(move || archive::pack_dir(&data_path, &archive_path))
            .await
            .map_err(|e| ManagerError::Internal(e.to_string()))??;

        let size = fs::metadata(&path)?.len() as i64;

        let backup = Backup {
            id: Uuid::new_v4().to_string(),
            server_id: server.id.clone(),
            name: name.to_string(),
            size,
            created_at: Utc::now(),
            path: path.to_string_lossy().into_owned(),
        };

        if let Err(e) = self.backups.insert(&backup).await {
            if let Err(remove_err) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %remove_err,
                    "failed to remove orphaned backup archive");
            }
            return Err(e.into());
        }

        self.events
            .emit(
                "backup.create",
                EventLevel::Info,
                format!("Backup '{}' created for server '{}'.", backup.name, server.name),
                Some(&server.id),
            )
            .await;

        Ok(backup)
    }

    /// Restore an instance to a snapshot: stop, wipe, extract, start.
    /// Extraction failures surface; partial writes remain on disk so the
    /// caller may retry.
    pub async fn restore(&self, backup_id: &str) -> Result<()> {
        let backup = self.backups.get(backup_id).await?;
        let server = self.servers.get(&backup.server_id).await?;

        self.events
            .emit(
                "backup.restore.start",
                EventLevel::Warn,
                format!(
                    "Restoration from backup '{}' started for server '{}'.",
                    backup.name, server.name
                ),
                Some(&server.id),
            )
            .await;

        if matches!(
            server.status,
            ServerStatus::Online | ServerStatus::Starting
        ) {
            self.manager.perform_action(&server.id, "stop").await?;
            tokio::time::sleep(RESTORE_STOP_GRACE).await;
        }

        let data_path = PathBuf::from(&server.data_path);
        let archive_path = PathBuf::from(&backup.path);
        tokio::task::spawn_blocking(move || {
            crate::provision::clear_dir(&data_path)?;
            archive::unpack_into(&archive_path, &data_path)
        })
        .await
        .map_err(|e| ManagerError::Internal(e.to_string()))??;

        self.manager.perform_action(&server.id, "start").await?;

        self.events
            .emit(
                "backup.restore.finish",
                EventLevel::Info,
                format!(
                    "Server '{}' successfully restored from backup '{}'.",
                    server.name, backup.name
                ),
                Some(&server.id),
            )
            .await;
        Ok(())
    }

    /// Remove the archive (ignoring a missing file) and the catalogue row.
    pub async fn delete(&self, backup_id: &str) -> Result<()> {
        let backup = self.backups.get(backup_id).await?;
        let server = self.servers.get(&backup.server_id).await.ok();

        if let Err(e) = fs::remove_file(&backup.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %backup.path, error = %e,
                    "could not delete backup archive from filesystem");
            }
        }

        self.backups.delete(backup_id).await?;

        if let Some(server) = server {
            self.events
                .emit(
                    "backup.delete",
                    EventLevel::Warn,
                    format!(
                        "Backup '{}' for server '{}' was deleted.",
                        backup.name, server.name
                    ),
                    Some(&server.id),
                )
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Hub;
    use crate::rcon::{RconDialer, RconError};
    use async_trait::async_trait;
    use ender_runtime::{ContainerRuntime, ContainerSpec, MockRuntime};
    use ender_store::{connect_in_memory, EventStore, TemplateStore};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Records every command sent over the console.
    struct RecordingDialer {
        pub commands: Mutex<Vec<String>>,
    }

    impl RecordingDialer {
        fn new() -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RconDialer for RecordingDialer {
        async fn probe(&self, _addr: &str, _password: &str) -> Result<(), RconError> {
            Ok(())
        }
        async fn execute(
            &self,
            _addr: &str,
            _password: &str,
            command: &str,
        ) -> Result<String, RconError> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(String::new())
        }
    }

    struct Fixture {
        engine: BackupEngine,
        servers: ServerStore,
        backups: BackupStore,
        events: EventStore,
        dialer: Arc<RecordingDialer>,
        server_id: String,
        data_root: TempDir,
        _backup_root: TempDir,
    }

    async fn fixture(status: ServerStatus) -> Fixture {
        let pool = connect_in_memory().await.unwrap();
        let servers = ServerStore::new(pool.clone());
        let templates = TemplateStore::new(pool.clone());
        let backups = BackupStore::new(pool.clone());
        let events_store = EventStore::new(pool);
        let runtime = Arc::new(MockRuntime::new());
        let dialer = Arc::new(RecordingDialer::new());
        let data_root = TempDir::new().unwrap();
        let backup_root = TempDir::new().unwrap();

        let container_id = runtime
            .create_container(&ContainerSpec {
                name: "enderdeploy_s1".to_string(),
                image: "eclipse-temurin:21-jdk".to_string(),
                data_path: data_root.path().to_path_buf(),
                game_port: 25565,
                rcon_port: 25575,
                memory_limit_mb: 2048,
                labels: HashMap::new(),
                cmd: vec![],
            })
            .await
            .unwrap();

        let data_path = data_root.path().join("s1");
        fs::create_dir_all(data_path.join("world")).unwrap();
        fs::write(data_path.join("world/level.dat"), b"precious").unwrap();
        fs::write(data_path.join("server.jar"), b"jar").unwrap();

        let mut server = ender_store::Server::new("s1".to_string(), "srv".to_string());
        server.status = status;
        server.docker_container_id = container_id;
        server.data_path = data_path.to_string_lossy().into_owned();
        server.rcon_password = "pw".to_string();
        servers.insert(&server).await.unwrap();

        let events = EventLog::new(events_store.clone());
        let manager = ServerManager::new(
            servers.clone(),
            templates,
            runtime,
            Arc::new(Hub::new()),
            events.clone(),
            dialer.clone(),
            data_root.path().to_path_buf(),
        );

        let engine = BackupEngine::new(
            servers.clone(),
            backups.clone(),
            events,
            manager,
            backup_root.path().to_path_buf(),
        );

        Fixture {
            engine,
            servers,
            backups,
            events: events_store,
            dialer,
            server_id: "s1".to_string(),
            data_root,
            _backup_root: backup_root,
        }
    }

    #[tokio::test]
    async fn test_offline_backup_skips_quiesce() {
        let fx = fixture(ServerStatus::Offline).await;
        let backup = fx.engine.create(&fx.server_id, "cold").await.unwrap();

        assert!(backup.size > 0);
        assert!(PathBuf::from(&backup.path).exists());
        assert!(fx.dialer.commands.lock().unwrap().is_empty());

        let events = fx.events.recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.kind == "backup.create"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_backup_brackets_with_write_barrier() {
        let fx = fixture(ServerStatus::Online).await;
        fx.engine.create(&fx.server_id, "warm").await.unwrap();

        let commands = fx.dialer.commands.lock().unwrap().clone();
        assert_eq!(commands, vec!["save-off", "save-all", "save-on"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_on_sent_even_when_archive_fails() {
        let fx = fixture(ServerStatus::Online).await;

        // Make the walk fail by pointing the server at a missing tree.
        let mut broken = fx.servers.get(&fx.server_id).await.unwrap();
        broken.data_path = fx
            .data_root
            .path()
            .join("definitely-missing")
            .to_string_lossy()
            .into_owned();
        fx.servers.delete(&fx.server_id).await.unwrap();
        fx.servers.insert(&broken).await.unwrap();

        let result = fx.engine.create(&fx.server_id, "doomed").await;
        assert!(result.is_err());

        let commands = fx.dialer.commands.lock().unwrap().clone();
        assert_eq!(commands, vec!["save-off", "save-all", "save-on"]);
        assert!(fx.backups.list_for_server(&fx.server_id).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_round_trip() {
        let fx = fixture(ServerStatus::Offline).await;
        let backup = fx.engine.create(&fx.server_id, "snapshot").await.unwrap();

        // Corrupt the live tree.
        let server = fx.servers.get(&fx.server_id).await.unwrap();
        let data_path = PathBuf::from(&server.data_path);
        fs::write(data_path.join("world/level.dat"), b"corrupted").unwrap();
        fs::write(data_path.join("junk.tmp"), b"junk").unwrap();

        fx.engine.restore(&backup.id).await.unwrap();

        assert_eq!(
            fs::read(data_path.join("world/level.dat")).unwrap(),
            b"precious"
        );
        assert!(!data_path.join("junk.tmp").exists());

        // Restore starts the instance again; the readiness probe may
        // already have promoted it.
        let status = fx.servers.get(&fx.server_id).await.unwrap().status;
        assert!(matches!(
            status,
            ServerStatus::Starting | ServerStatus::Online
        ));

        let events = fx.events.recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.kind == "backup.restore.start"));
        assert!(events.iter().any(|e| e.kind == "backup.restore.finish"));
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_row() {
        let fx = fixture(ServerStatus::Offline).await;
        let backup = fx.engine.create(&fx.server_id, "bye").await.unwrap();
        let path = PathBuf::from(&backup.path);
        assert!(path.exists());

        fx.engine.delete(&backup.id).await.unwrap();
        assert!(!path.exists());
        assert!(fx.backups.list_for_server(&fx.server_id).await.unwrap().is_empty());

        let events = fx.events.recent(10).await.unwrap();
        assert!(events.iter().any(|e| e.kind == "backup.delete"));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_file() {
        let fx = fixture(ServerStatus::Offline).await;
        let backup = fx.engine.create(&fx.server_id, "gone").await.unwrap();
        fs::remove_file(&backup.path).unwrap();

        fx.engine.delete(&backup.id).await.unwrap();
        assert!(fx.backups.get(&backup.id).await.is_err());
    }

    #[tokio::test]
    async fn test_create_unknown_server() {
        let fx = fixture(ServerStatus::Offline).await;
        assert!(fx.engine.create("ghost", "x").await.unwrap_err().is_not_found());
    }
}
