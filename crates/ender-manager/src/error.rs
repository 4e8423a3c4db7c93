//! Manager error taxonomy
//!
//! Mirrors how the HTTP surface needs to discriminate failures: not-found,
//! invalid input, state conflicts, transient conditions, and provisioning
//! failures that triggered compensating cleanup.

use thiserror::Error;

use crate::rcon::RconError;
use ender_runtime::RuntimeError;
use ender_store::StoreError;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// Referenced entity is absent
    #[error("{0}")]
    NotFound(String),

    /// Request content is unusable (bad action, malformed cron, missing
    /// command, path escape)
    #[error("{0}")]
    InvalidInput(String),

    /// Action requires a running instance
    #[error("server is not online")]
    NotOnline,

    /// Condition expected to clear on its own; caller may retry
    #[error("transient: {0}")]
    Transient(String),

    /// Provisioning step failed; side effects were rolled back
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// Port scan exhausted the range
    #[error("no available ports found")]
    NoFreePort,

    /// Remote console failure after retries
    #[error("rcon: {0}")]
    Rcon(#[from] RconError),

    /// Archive read/write failure
    #[error("archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl ManagerError {
    /// Whether the failure maps to a 404 at the HTTP surface.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ManagerError::NotFound(_)
                | ManagerError::Store(StoreError::NotFound { .. })
                | ManagerError::Runtime(RuntimeError::NotFound { .. })
        )
    }
}

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;
