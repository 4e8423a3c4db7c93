//! Telemetry & state reconciler
//!
//! Fixed-interval loop converging declared status with observed runtime
//! state. Per instance: a one-shot stats reading drives CPU/RAM/storage
//! derivation, an offline-desync repair, and a cooldown-gated high-CPU
//! alert. The `starting -> online` transition is never written here; the
//! readiness prober owns it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ender_runtime::{ContainerRuntime, RuntimeError};
use ender_store::{EventLevel, PlayerInfo, ResourceUsage, Server, ServerStatus, ServerStore};

use crate::bus::Hub;
use crate::events::EventLog;
use crate::message::Frame;
use crate::provision::dir_size;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(15);
const HIGH_CPU_THRESHOLD: f64 = 90.0;
const ALERT_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// Fixed per-instance storage quota the usage percentage is derived from.
const STORAGE_QUOTA_BYTES: u64 = 50 * 1024 * 1024 * 1024;

/// Background loop that mirrors runtime state into the catalogue.
pub struct StatReconciler {
    servers: ServerStore,
    runtime: Arc<dyn ContainerRuntime>,
    hub: Arc<Hub>,
    events: EventLog,
    high_cpu_alerts: Mutex<HashMap<String, Instant>>,
    running: AtomicBool,
    shutdown: tokio::sync::Notify,
}

impl StatReconciler {
    pub fn new(
        servers: ServerStore,
        runtime: Arc<dyn ContainerRuntime>,
        hub: Arc<Hub>,
        events: EventLog,
    ) -> Self {
        Self {
            servers,
            runtime,
            hub,
            events,
            high_cpu_alerts: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown: tokio::sync::Notify::new(),
        }
    }

    /// Run until `shutdown()` is called. One immediate pass, then every 15 s.
    pub async fn run_loop(self: Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("stat reconciler is already running");
            return;
        }

        tracing::info!("stat reconciler started");
        let mut interval = tokio::time::interval(RECONCILE_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reconcile_all().await;
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("stat reconciler received shutdown signal");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("stat reconciler stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    async fn reconcile_all(self: &Arc<Self>) {
        let servers = match self.servers.list().await {
            Ok(servers) => servers,
            Err(e) => {
                tracing::error!(error = %e, "reconciler failed to query servers");
                return;
            }
        };

        for server in servers {
            if server.status.is_reconciled() {
                let reconciler = self.clone();
                tokio::spawn(async move {
                    reconciler.update_single(server).await;
                });
            }
        }
    }

    /// Reconcile one instance. Public so tests can drive a tick directly.
    pub async fn update_single(&self, mut server: Server) {
        if server.docker_container_id.is_empty() {
            tracing::warn!(server_id = %server.id,
                "skipping stats, instance has no container yet");
            return;
        }

        match self
            .runtime
            .container_stats(&server.docker_container_id)
            .await
        {
            Err(RuntimeError::NotFound { .. }) => {
                // Container is gone. If our state does not reflect that,
                // fix it; otherwise there is nothing to write.
                if server.status != ServerStatus::Offline {
                    tracing::warn!(server_id = %server.id,
                        "container not found, marking offline");
                    server.status = ServerStatus::Offline;
                    server.resources = ResourceUsage::default();
                    server.players = PlayerInfo {
                        current: 0,
                        max: server.players.max,
                    };
                } else {
                    return;
                }
            }
            Err(e) => {
                // Transient (stopping, starting, stream closed): write
                // nothing so the status cannot flap.
                tracing::debug!(server_id = %server.id, error = %e,
                    "non-fatal error getting stats");
                return;
            }
            Ok(sample) => {
                // The readiness prober owns starting -> online. Stats only
                // correct an offline desync.
                if server.status == ServerStatus::Offline {
                    tracing::warn!(server_id = %server.id,
                        "container is running but status was offline, correcting to online");
                    server.status = ServerStatus::Online;
                }

                server.resources.cpu = sample.cpu_percent();
                server.resources.ram = sample.ram_percent();
                server.resources.storage = self.storage_percent(&server.data_path).await;

                self.check_high_cpu(&server).await;
            }
        }

        if let Err(e) = self.servers.update_stats(&server).await {
            tracing::error!(server_id = %server.id, error = %e,
                "failed to write server stats");
            return;
        }
        self.hub.broadcast(&Frame::server_update(server));
    }

    async fn storage_percent(&self, data_path: &str) -> i64 {
        let path = PathBuf::from(data_path);
        let size = tokio::task::spawn_blocking(move || dir_size(&path))
            .await
            .unwrap_or(0);
        storage_percent_of_quota(size)
    }

    async fn check_high_cpu(&self, server: &Server) {
        if server.resources.cpu <= HIGH_CPU_THRESHOLD {
            return;
        }

        {
            let mut alerts = self.high_cpu_alerts.lock().expect("alert lock poisoned");
            if let Some(last) = alerts.get(&server.id) {
                if last.elapsed() < ALERT_COOLDOWN {
                    return;
                }
            }
            alerts.insert(server.id.clone(), Instant::now());
        }

        self.events
            .emit(
                "system.alert.cpu",
                EventLevel::Warn,
                format!(
                    "High CPU usage ({:.1}%) detected on server '{}'.",
                    server.resources.cpu, server.name
                ),
                Some(&server.id),
            )
            .await;
    }
}

/// Storage percentage math, shared with tests.
pub fn storage_percent_of_quota(size_bytes: u64) -> i64 {
    ((size_bytes as f64 / STORAGE_QUOTA_BYTES as f64) * 100.0) as i64
}
