//! Catalogue models
//!
//! Wire field names are camelCase to match the dashboard contract; columns
//! that must never reach a client (paths, container ids, RCON passwords,
//! password hashes) are skipped during serialization.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::StoreError;

/// Declared lifecycle status of a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Offline,
    Starting,
    Online,
    Stopping,
    Error,
}

impl ServerStatus {
    /// Statuses the reconciler polls on each tick.
    pub fn is_reconciled(self) -> bool {
        matches!(
            self,
            ServerStatus::Online | ServerStatus::Starting | ServerStatus::Stopping
        )
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Offline => "offline",
            ServerStatus::Starting => "starting",
            ServerStatus::Online => "online",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for ServerStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(ServerStatus::Offline),
            "starting" => Ok(ServerStatus::Starting),
            "online" => Ok(ServerStatus::Online),
            "stopping" => Ok(ServerStatus::Stopping),
            "error" => Ok(ServerStatus::Error),
            other => Err(StoreError::Invalid(format!(
                "unknown server status '{other}'"
            ))),
        }
    }
}

/// Severity of an event-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for EventLevel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(EventLevel::Info),
            "warn" => Ok(EventLevel::Warn),
            "error" => Ok(EventLevel::Error),
            other => Err(StoreError::Invalid(format!("unknown event level '{other}'"))),
        }
    }
}

/// Current and maximum player counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct PlayerInfo {
    pub current: i64,
    pub max: i64,
}

/// Last observed resource usage, as percentages of the instance's limits.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct ResourceUsage {
    pub cpu: f64,
    pub ram: f64,
    pub storage: i64,
}

/// Optional modpack identity carried for display purposes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModpackInfo {
    pub name: String,
    pub version: String,
}

/// A managed game-server instance.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: String,
    pub name: String,
    pub status: ServerStatus,
    pub port: i64,
    pub minecraft_version: String,
    pub java_version: String,
    pub players: PlayerInfo,
    pub resources: ResourceUsage,
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modpack: Option<ModpackInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(rename = "maxMemoryMB")]
    pub max_memory_mb: i64,
    pub created_at: DateTime<Utc>,
    /// Runtime container identity; never exposed to clients
    #[serde(skip)]
    pub docker_container_id: String,
    /// Absolute working-tree path; never exposed to clients
    #[serde(skip)]
    pub data_path: String,
    /// Generated RCON credential; never exposed to clients
    #[serde(skip)]
    pub rcon_password: String,
}

/// A reusable server blueprint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub minecraft_version: String,
    pub java_version: String,
    #[serde(default)]
    pub server_type: String,
    #[serde(rename = "minMemoryMB")]
    pub min_memory_mb: i64,
    #[serde(rename = "maxMemoryMB")]
    pub max_memory_mb: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub jvm_args: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Host path of the pre-packaged working-tree archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
    /// Command baked into the generated start script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_command: Option<String>,
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub password_hash: String,
}

/// A consistent snapshot of a server's working tree.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    /// Archive location on disk; never exposed to clients
    #[serde(skip)]
    pub path: String,
}

/// An append-only event-log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub level: EventLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A cron-triggered task bound to a server.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub server_id: String,
    pub name: String,
    /// Standard 5-field cron expression
    pub cron_expression: String,
    /// `start | stop | restart | backup | command`
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub payload: Option<serde_json::Value>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One row of the resource-usage time series.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDataPoint {
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f64,
    pub ram_usage: f64,
    pub players_current: i64,
}

/// Fleet-wide aggregation for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_servers: i64,
    pub online_servers: i64,
    pub total_players: i64,
    pub max_players: i64,
    pub system_health: f64,
    pub server_status_dist: HashMap<String, i64>,
    pub resource_history: Vec<ResourceDataPoint>,
    pub player_history: Vec<ResourceDataPoint>,
}

/// A file-tree listing entry scoped to a server's working tree.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: i64,
    pub is_dir: bool,
    pub modified: DateTime<Utc>,
}

/// A player currently connected to a server.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OnlinePlayer {
    pub name: String,
    pub uuid: String,
}

/// Parsed `server.properties` contents. Ordered so rewrites are stable.
pub type ServerSettings = BTreeMap<String, String>;

impl Server {
    /// A fresh, unprovisioned instance row with defaults applied.
    pub fn new(id: String, name: String) -> Self {
        Server {
            id,
            name,
            status: ServerStatus::Offline,
            port: 0,
            minecraft_version: String::new(),
            java_version: String::new(),
            players: PlayerInfo { current: 0, max: 20 },
            resources: ResourceUsage::default(),
            ip_address: String::new(),
            modpack: None,
            template_id: None,
            max_memory_mb: 1024,
            created_at: Utc::now(),
            docker_container_id: String::new(),
            data_path: String::new(),
            rcon_password: String::new(),
        }
    }
}
