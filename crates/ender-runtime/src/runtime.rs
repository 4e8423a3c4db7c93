//! Abstract container runtime interface
//!
//! Defines the [`ContainerRuntime`] trait the lifecycle manager, reconciler
//! and command broker are written against, so the core can be driven against
//! a fake in tests without a Docker daemon.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::BoxStream;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Result, RuntimeError};
use crate::stats::StatsSample;

/// Everything needed to create an instance container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name (`enderdeploy_{instanceId}`)
    pub name: String,
    /// Image reference (e.g. `eclipse-temurin:21-jdk`)
    pub image: String,
    /// Host working tree, bind-mounted at `/data`
    pub data_path: PathBuf,
    /// Host port published for the internal game port
    pub game_port: u16,
    /// Host port published for the internal RCON port
    pub rcon_port: u16,
    /// Memory cap in MB (instance memory + overhead)
    pub memory_limit_mb: i64,
    /// Container labels (managed marker + instance id)
    pub labels: HashMap<String, String>,
    /// Process to run, relative to `/data`
    pub cmd: Vec<String>,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerStatus {
    /// Whether the container process is running
    pub running: bool,
    /// Host port the internal game port is published on
    pub game_host_port: Option<u16>,
    /// Host port the internal RCON port is published on
    pub rcon_host_port: Option<u16>,
}

/// Demultiplexed output of an in-container exec.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// Stream of log lines from a container, following until cancelled.
pub type LogStream = BoxStream<'static, Result<String>>;

/// Abstract container runtime.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ensure an image is present locally, pulling it if missing.
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create a container, returning its runtime identity.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, giving the process `grace` to exit cleanly.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    /// Restart a container.
    async fn restart_container(&self, id: &str) -> Result<()>;

    /// Force-remove a container and its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Inspect a container's run state and published ports.
    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus>;

    /// Take a one-shot resource reading.
    async fn container_stats(&self, id: &str) -> Result<StatsSample>;

    /// Tail recent log lines and follow new ones until the stream is dropped.
    async fn follow_logs(&self, id: &str) -> Result<LogStream>;

    /// Execute a command inside the container, demultiplexing output.
    async fn exec(&self, id: &str, cmd: &[String], workdir: &str) -> Result<ExecOutput>;
}

/// Configured outcome of a stats call against the mock runtime.
#[derive(Debug, Clone)]
pub enum StatsOutcome {
    NotFound,
    Transient,
    Sample(StatsSample),
}

#[derive(Debug)]
struct MockContainer {
    spec: Option<ContainerSpec>,
    running: bool,
    stats: StatsOutcome,
}

/// In-memory runtime for tests and development.
#[derive(Default)]
pub struct MockRuntime {
    containers: RwLock<HashMap<String, MockContainer>>,
    next_create_error: Mutex<Option<RuntimeError>>,
    created: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a container in the running state.
    pub async fn insert_running(&self, id: &str) {
        self.containers.write().await.insert(
            id.to_string(),
            MockContainer {
                spec: None,
                running: true,
                stats: StatsOutcome::Transient,
            },
        );
    }

    /// Flip a container's run state.
    pub async fn set_running(&self, id: &str, running: bool) {
        if let Some(c) = self.containers.write().await.get_mut(id) {
            c.running = running;
        }
    }

    /// Configure what the next stats calls for `id` return.
    pub async fn set_stats(&self, id: &str, outcome: StatsOutcome) {
        if let Some(c) = self.containers.write().await.get_mut(id) {
            c.stats = outcome;
        }
    }

    /// Make the next `create_container` call fail with `err`.
    pub async fn fail_next_create(&self, err: RuntimeError) {
        *self.next_create_error.lock().await = Some(err);
    }

    /// Number of successful `create_container` calls so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// The spec the container was created with, if any.
    pub async fn container_spec(&self, id: &str) -> Option<ContainerSpec> {
        self.containers
            .read()
            .await
            .get(id)
            .and_then(|c| c.spec.clone())
    }

    /// Whether the container currently exists.
    pub async fn contains(&self, id: &str) -> bool {
        self.containers.read().await.contains_key(id)
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ensure_image(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        if let Some(err) = self.next_create_error.lock().await.take() {
            return Err(err);
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock-container-{n}");
        self.containers.write().await.insert(
            id.clone(),
            MockContainer {
                spec: Some(spec.clone()),
                running: false,
                stats: StatsOutcome::Transient,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.write().await;
        let container = containers.get_mut(id).ok_or_else(|| RuntimeError::NotFound {
            container: id.to_string(),
        })?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
        let mut containers = self.containers.write().await;
        let container = containers.get_mut(id).ok_or_else(|| RuntimeError::NotFound {
            container: id.to_string(),
        })?;
        container.running = false;
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        self.start_container(id).await
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.containers.write().await.remove(id);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus> {
        let containers = self.containers.read().await;
        let container = containers.get(id).ok_or_else(|| RuntimeError::NotFound {
            container: id.to_string(),
        })?;
        Ok(ContainerStatus {
            running: container.running,
            game_host_port: container.spec.as_ref().map(|s| s.game_port),
            rcon_host_port: container.spec.as_ref().map(|s| s.rcon_port),
        })
    }

    async fn container_stats(&self, id: &str) -> Result<StatsSample> {
        let containers = self.containers.read().await;
        let container = containers.get(id).ok_or_else(|| RuntimeError::NotFound {
            container: id.to_string(),
        })?;
        match &container.stats {
            StatsOutcome::NotFound => Err(RuntimeError::NotFound {
                container: id.to_string(),
            }),
            StatsOutcome::Transient => {
                Err(RuntimeError::Transient("container is starting".to_string()))
            }
            StatsOutcome::Sample(sample) => Ok(*sample),
        }
    }

    async fn follow_logs(&self, id: &str) -> Result<LogStream> {
        if !self.containers.read().await.contains_key(id) {
            return Err(RuntimeError::NotFound {
                container: id.to_string(),
            });
        }
        let lines = vec![
            Ok(format!("[{id}] container started")),
            Ok(format!("[{id}] ready")),
        ];
        Ok(Box::pin(futures_util::stream::iter(lines)))
    }

    async fn exec(&self, id: &str, cmd: &[String], _workdir: &str) -> Result<ExecOutput> {
        if !self.containers.read().await.contains_key(id) {
            return Err(RuntimeError::NotFound {
                container: id.to_string(),
            });
        }
        Ok(ExecOutput {
            stdout: cmd.join(" "),
            stderr: String::new(),
            exit_code: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn test_spec() -> ContainerSpec {
        ContainerSpec {
            name: "enderdeploy_test".to_string(),
            image: "eclipse-temurin:21-jdk".to_string(),
            data_path: PathBuf::from("/tmp/test"),
            game_port: 25565,
            rcon_port: 25575,
            memory_limit_mb: 2560,
            labels: HashMap::new(),
            cmd: vec!["/bin/sh".to_string(), "start.sh".to_string()],
        }
    }

    #[tokio::test]
    async fn test_mock_lifecycle() {
        let runtime = MockRuntime::new();
        let id = runtime.create_container(&test_spec()).await.unwrap();

        let status = runtime.inspect_container(&id).await.unwrap();
        assert!(!status.running);
        assert_eq!(status.rcon_host_port, Some(25575));

        runtime.start_container(&id).await.unwrap();
        assert!(runtime.inspect_container(&id).await.unwrap().running);

        runtime
            .stop_container(&id, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!runtime.inspect_container(&id).await.unwrap().running);

        runtime.remove_container(&id).await.unwrap();
        assert!(matches!(
            runtime.inspect_container(&id).await,
            Err(RuntimeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_stats_outcomes() {
        let runtime = MockRuntime::new();
        let id = runtime.create_container(&test_spec()).await.unwrap();

        assert!(matches!(
            runtime.container_stats(&id).await,
            Err(RuntimeError::Transient(_))
        ));

        runtime
            .set_stats(&id, StatsOutcome::Sample(StatsSample::default()))
            .await;
        assert!(runtime.container_stats(&id).await.is_ok());

        runtime.set_stats(&id, StatsOutcome::NotFound).await;
        assert!(matches!(
            runtime.container_stats(&id).await,
            Err(RuntimeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_fail_next_create() {
        let runtime = MockRuntime::new();
        runtime
            .fail_next_create(RuntimeError::CreateFailed {
                reason: "port is already allocated".to_string(),
            })
            .await;

        let err = runtime.create_container(&test_spec()).await.unwrap_err();
        assert!(err.is_port_conflict());

        // Next call succeeds again
        assert!(runtime.create_container(&test_spec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_log_stream_ends() {
        let runtime = MockRuntime::new();
        let id = runtime.create_container(&test_spec()).await.unwrap();
        let mut stream = runtime.follow_logs(&id).await.unwrap();
        let mut count = 0;
        while let Some(line) = stream.next().await {
            line.unwrap();
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
