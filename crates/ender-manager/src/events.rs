//! Event log writer
//!
//! Append-only record of significant transitions. Background paths must
//! never die because an event failed to persist, so failures are logged and
//! swallowed here.

use ender_store::{EventLevel, EventStore};

/// Writes events to the catalogue and mirrors them into the process log.
#[derive(Clone)]
pub struct EventLog {
    store: EventStore,
}

impl EventLog {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    pub async fn emit(
        &self,
        kind: &str,
        level: EventLevel,
        message: impl Into<String>,
        server_id: Option<&str>,
    ) {
        let message = message.into();
        match level {
            EventLevel::Info => {
                tracing::info!(event = %kind, server_id = ?server_id, "{message}")
            }
            EventLevel::Warn => {
                tracing::warn!(event = %kind, server_id = ?server_id, "{message}")
            }
            EventLevel::Error => {
                tracing::error!(event = %kind, server_id = ?server_id, "{message}")
            }
        }

        if let Err(e) = self.store.insert(kind, level, &message, server_id).await {
            tracing::warn!(event = %kind, error = %e, "failed to persist event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ender_store::connect_in_memory;

    #[tokio::test]
    async fn test_emit_persists() {
        let pool = connect_in_memory().await.unwrap();
        let store = EventStore::new(pool);
        let log = EventLog::new(store.clone());

        log.emit("server.start", EventLevel::Info, "Server 'x' is starting.", None)
            .await;

        let events = store.recent(5).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "server.start");
    }
}
