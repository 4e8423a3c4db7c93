//! Command broker
//!
//! Resolves an instance's remote-console endpoint from the container's
//! published ports, opens a short-lived authenticated session (with retry to
//! cover the window where the instance is declared online but the console
//! has not bound yet), executes, and returns the transcript.

use std::sync::Arc;
use std::time::Duration;

use ender_runtime::ContainerRuntime;
use ender_store::{ServerStatus, ServerStore};

use crate::error::{ManagerError, Result};
use crate::rcon::RconDialer;

const RCON_ATTEMPTS: u32 = 3;
const RCON_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Brokers RCON and in-container commands for online instances.
#[derive(Clone)]
pub struct CommandBroker {
    servers: ServerStore,
    runtime: Arc<dyn ContainerRuntime>,
    dialer: Arc<dyn RconDialer>,
}

impl CommandBroker {
    pub fn new(
        servers: ServerStore,
        runtime: Arc<dyn ContainerRuntime>,
        dialer: Arc<dyn RconDialer>,
    ) -> Self {
        Self {
            servers,
            runtime,
            dialer,
        }
    }

    /// Execute `command` over the instance's remote console and return the
    /// full transcript.
    pub async fn send_command(&self, server_id: &str, command: &str) -> Result<String> {
        let server = self.servers.get(server_id).await?;
        if server.status != ServerStatus::Online {
            return Err(ManagerError::NotOnline);
        }

        let status = self
            .runtime
            .inspect_container(&server.docker_container_id)
            .await?;
        let port = status.rcon_host_port.ok_or_else(|| {
            ManagerError::Transient(format!("rcon port not bound for server {server_id}"))
        })?;
        let addr = format!("127.0.0.1:{port}");

        let mut last_err = None;
        for attempt in 1..=RCON_ATTEMPTS {
            match self
                .dialer
                .execute(&addr, &server.rcon_password, command)
                .await
            {
                Ok(transcript) => {
                    tracing::info!(server_id = %server_id, command = %command,
                        "rcon command executed");
                    return Ok(transcript);
                }
                Err(e) => {
                    tracing::warn!(server_id = %server_id, attempt,
                        error = %e, "rcon connection attempt failed, retrying");
                    last_err = Some(e);
                    if attempt < RCON_ATTEMPTS {
                        tokio::time::sleep(RCON_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(last_err.map(ManagerError::Rcon).unwrap_or_else(|| {
            ManagerError::Internal("rcon retry loop produced no error".to_string())
        }))
    }

    /// Run a shell line inside the instance's container, returning stdout
    /// with stderr appended under a divider.
    pub async fn exec_terminal(&self, server_id: &str, command: &str) -> Result<String> {
        let server = self.servers.get(server_id).await?;
        if server.status != ServerStatus::Online {
            return Err(ManagerError::NotOnline);
        }

        let output = self
            .runtime
            .exec(
                &server.docker_container_id,
                &["sh".to_string(), "-c".to_string(), command.to_string()],
                "/data",
            )
            .await?;

        let mut response = output.stdout;
        if !output.stderr.is_empty() {
            response.push_str("\n--- STDERR ---\n");
            response.push_str(&output.stderr);
        }
        Ok(response)
    }
}
