//! Runtime adapter errors

use thiserror::Error;

/// Errors surfaced by the container runtime adapter.
///
/// The distinction between [`RuntimeError::NotFound`] and
/// [`RuntimeError::Transient`] matters to callers: the reconciler treats a
/// missing container as ground truth (the instance is gone) but ignores
/// transient failures entirely to avoid status flapping.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Container does not exist on the daemon
    #[error("container '{container}' not found")]
    NotFound { container: String },

    /// Request conflicts with current daemon state (e.g. a host port is
    /// already allocated)
    #[error("runtime conflict: {reason}")]
    Conflict { reason: String },

    /// Temporary condition (container stopping/starting, stream closed);
    /// callers should retry on their next tick
    #[error("transient runtime error: {0}")]
    Transient(String),

    /// Failed to pull an image
    #[error("failed to pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    /// Failed to create a container
    #[error("failed to create container: {reason}")]
    CreateFailed { reason: String },

    /// Anything else from the daemon or the connection to it
    #[error("runtime error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether this error indicates a host port collision during container
    /// creation. The creation path re-allocates ports and retries once when
    /// this is true.
    pub fn is_port_conflict(&self) -> bool {
        match self {
            RuntimeError::Conflict { reason } | RuntimeError::CreateFailed { reason } => {
                let reason = reason.to_ascii_lowercase();
                reason.contains("port is already allocated")
                    || reason.contains("address already in use")
            }
            _ => false,
        }
    }
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_conflict_detection() {
        let err = RuntimeError::CreateFailed {
            reason: "driver failed: Bind for 0.0.0.0:25565 failed: port is already allocated"
                .to_string(),
        };
        assert!(err.is_port_conflict());

        let err = RuntimeError::Conflict {
            reason: "listen tcp 0.0.0.0:25575: bind: address already in use".to_string(),
        };
        assert!(err.is_port_conflict());

        let err = RuntimeError::CreateFailed {
            reason: "no such image".to_string(),
        };
        assert!(!err.is_port_conflict());

        let err = RuntimeError::NotFound {
            container: "abc".to_string(),
        };
        assert!(!err.is_port_conflict());
    }
}
