//! Durable catalogue for ender-deploy
//!
//! One SQLite file holds everything the control plane must not lose:
//! servers, templates, users, backups, schedules, the append-only event log
//! and the resource-usage time series. Write paths that touch two tables
//! (live snapshot + history) run in a transaction.

pub mod backups;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod schedules;
pub mod servers;
pub mod templates;
pub mod users;

pub use backups::BackupStore;
pub use db::{connect, connect_in_memory, migrate};
pub use error::{Result, StoreError};
pub use events::EventStore;
pub use models::{
    Backup, DashboardStats, Event, EventLevel, FileInfo, ModpackInfo, OnlinePlayer, PlayerInfo,
    ResourceDataPoint, ResourceUsage, Schedule, Server, ServerSettings, ServerStatus, Template,
    User,
};
pub use schedules::ScheduleStore;
pub use servers::ServerStore;
pub use templates::TemplateStore;
pub use users::UserStore;
