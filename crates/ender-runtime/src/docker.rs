//! Docker-based container runtime using bollard
//!
//! Connects to the local Docker daemon and implements [`ContainerRuntime`]
//! for it. All instance containers are created with the managed label set so
//! they can be enumerated on recovery.

use std::collections::HashMap;
use std::time::Duration;

use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StatsOptions,
    StopContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;

use crate::error::{Result, RuntimeError};
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerStatus, ExecOutput, LogStream};
use crate::stats::StatsSample;
use crate::{INTERNAL_GAME_PORT, INTERNAL_RCON_PORT};

/// Container runtime backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime").finish_non_exhaustive()
    }
}

impl DockerRuntime {
    /// Connect to the Docker daemon using platform defaults and verify the
    /// connection with a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is not running or unreachable.
    pub async fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Internal(format!("failed to connect to Docker: {e}")))?;

        docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Internal(format!("Docker ping failed: {e}")))?;

        tracing::info!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Wrap a pre-configured bollard client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Map a daemon error to the adapter taxonomy.
fn map_docker_err(container: &str, e: bollard::errors::Error) -> RuntimeError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound {
            container: container.to_string(),
        },
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict { reason: message },
        other => RuntimeError::Internal(other.to_string()),
    }
}

/// First host port bound for `internal_port/tcp`, if any.
fn published_port(
    ports: Option<&HashMap<String, Option<Vec<PortBinding>>>>,
    internal_port: u16,
) -> Option<u16> {
    ports?
        .get(&format!("{internal_port}/tcp"))?
        .as_ref()?
        .first()?
        .host_port
        .as_ref()?
        .parse()
        .ok()
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!(image = %image, "image already present, skipping pull");
            return Ok(());
        }

        let (name, tag) = match image.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (image, "latest"),
        };

        tracing::info!(image = %image, "image not found locally, pulling");

        let options = CreateImageOptions {
            from_image: Some(name.to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::debug!(image = %image, status = %status, "pull progress");
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::PullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(image = %image, "image pulled successfully");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        port_bindings.insert(
            format!("{INTERNAL_GAME_PORT}/tcp"),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.game_port.to_string()),
            }]),
        );
        port_bindings.insert(
            format!("{INTERNAL_RCON_PORT}/tcp"),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.rcon_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            mounts: Some(vec![Mount {
                target: Some("/data".to_string()),
                source: Some(spec.data_path.to_string_lossy().into_owned()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            }]),
            port_bindings: Some(port_bindings),
            memory: Some(spec.memory_limit_mb * 1024 * 1024),
            ..Default::default()
        };

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            working_dir: Some("/data".to_string()),
            cmd: Some(spec.cmd.clone()),
            tty: Some(true),
            exposed_ports: Some(vec![
                format!("{INTERNAL_GAME_PORT}/tcp"),
                format!("{INTERNAL_RCON_PORT}/tcp"),
            ]),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            platform: String::new(),
        };

        tracing::info!(container = %spec.name, image = %spec.image, "creating container");

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::CreateFailed {
                reason: e.to_string(),
            })?;

        tracing::info!(container = %spec.name, id = %response.id, "container created");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        tracing::info!(container = %id, "starting container");
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| map_docker_err(id, e))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        tracing::info!(container = %id, grace = ?grace, "stopping container");
        let options = StopContainerOptions {
            t: Some(grace.as_secs() as i32),
            signal: None,
        };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| map_docker_err(id, e))
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        tracing::info!(container = %id, "restarting container");
        self.docker
            .restart_container(id, None::<RestartContainerOptions>)
            .await
            .map_err(|e| map_docker_err(id, e))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        tracing::info!(container = %id, "removing container");
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_docker_err(id, e))
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_docker_err(id, e))?;

        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        let ports = inspect.network_settings.and_then(|n| n.ports);

        Ok(ContainerStatus {
            running,
            game_host_port: published_port(ports.as_ref(), INTERNAL_GAME_PORT),
            rcon_host_port: published_port(ports.as_ref(), INTERNAL_RCON_PORT),
        })
    }

    async fn container_stats(&self, id: &str) -> Result<StatsSample> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stream = self.docker.stats(id, Some(options));

        let stats = stream
            .next()
            .await
            .ok_or_else(|| RuntimeError::Transient("stats stream closed".to_string()))?
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => RuntimeError::NotFound {
                    container: id.to_string(),
                },
                other => RuntimeError::Transient(other.to_string()),
            })?;

        let cpu = stats.cpu_stats.as_ref();
        let precpu = stats.precpu_stats.as_ref();

        Ok(StatsSample {
            cpu_total_usage: cpu
                .and_then(|s| s.cpu_usage.as_ref())
                .and_then(|u| u.total_usage)
                .unwrap_or(0),
            precpu_total_usage: precpu
                .and_then(|s| s.cpu_usage.as_ref())
                .and_then(|u| u.total_usage)
                .unwrap_or(0),
            system_cpu_usage: cpu.and_then(|s| s.system_cpu_usage).unwrap_or(0),
            presystem_cpu_usage: precpu.and_then(|s| s.system_cpu_usage).unwrap_or(0),
            online_cpus: cpu.and_then(|s| s.online_cpus).unwrap_or(0),
            memory_usage: stats
                .memory_stats
                .as_ref()
                .and_then(|m| m.usage)
                .unwrap_or(0),
            memory_limit: stats
                .memory_stats
                .as_ref()
                .and_then(|m| m.limit)
                .unwrap_or(0),
        })
    }

    async fn follow_logs(&self, id: &str) -> Result<LogStream> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            follow: true,
            timestamps: true,
            tail: "100".to_string(),
            ..Default::default()
        };

        let container = id.to_string();
        let stream = self
            .docker
            .logs(id, Some(options))
            .map(move |item| {
                let lines: Vec<Result<String>> = match item {
                    Ok(chunk) => chunk
                        .to_string()
                        .lines()
                        .map(|l| Ok(l.to_string()))
                        .collect(),
                    Err(e) => vec![Err(map_docker_err(&container, e))],
                };
                futures_util::stream::iter(lines)
            })
            .flatten();

        Ok(Box::pin(stream))
    }

    async fn exec(&self, id: &str, cmd: &[String], workdir: &str) -> Result<ExecOutput> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(workdir.to_string()),
            ..Default::default()
        };

        let exec_created = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| map_docker_err(id, e))?;

        let start_result = self
            .docker
            .start_exec(&exec_created.id, None)
            .await
            .map_err(|e| RuntimeError::Internal(format!("failed to start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(result) = output.next().await {
                    match result {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(container = %id, error = %e, "error reading exec output");
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                tracing::warn!(container = %id, "exec started in detached mode unexpectedly");
            }
        }

        let exec_inspect = self
            .docker
            .inspect_exec(&exec_created.id)
            .await
            .map_err(|e| RuntimeError::Internal(format!("failed to inspect exec: {e}")))?;

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: exec_inspect.exit_code.unwrap_or(0),
        })
    }
}
