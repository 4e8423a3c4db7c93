//! Core subsystems of the ender-deploy control plane
//!
//! Builds on the runtime adapter and the catalogue store to provide the
//! instance lifecycle manager, the telemetry reconciler, the live session
//! bus, the command broker, the backup engine and the scheduler. The HTTP
//! surface in `ender-api` is a thin shell over this crate.

pub mod archive;
pub mod backup;
pub mod bus;
pub mod command;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod message;
pub mod ports;
pub mod provision;
pub mod rcon;
pub mod reconciler;
pub mod scheduler;

pub use backup::BackupEngine;
pub use bus::{Hub, SessionId, GLOBAL_TOPIC, OUTBOX_CAPACITY};
pub use command::CommandBroker;
pub use error::{ManagerError, Result};
pub use events::EventLog;
pub use lifecycle::{ServerAction, ServerManager, SystemResources};
pub use message::{ConsoleSource, Frame, IncomingMessage};
pub use ports::find_available_port;
pub use rcon::{RconClient, RconDialer, RconError, TcpRconDialer};
pub use reconciler::StatReconciler;
pub use scheduler::{ScheduleTask, Scheduler};
