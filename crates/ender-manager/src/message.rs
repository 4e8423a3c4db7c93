//! WebSocket frame types
//!
//! Frames are JSON objects discriminated by `action`; the shapes match the
//! dashboard contract exactly.

use serde::{Deserialize, Serialize};

use ender_store::Server;

/// Where a console line originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleSource {
    Docker,
    Rcon,
    Terminal,
    System,
}

/// One console line pushed to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleOutput {
    pub source: ConsoleSource,
    pub command: String,
    pub line: String,
}

/// Error payload pushed to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Outbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Frame {
    ServerUpdate { payload: Box<Server> },
    ServerDeleted { id: String },
    ConsoleOutput { payload: ConsoleOutput },
    Error { payload: ErrorPayload },
}

impl Frame {
    pub fn server_update(server: Server) -> Self {
        Frame::ServerUpdate {
            payload: Box::new(server),
        }
    }

    pub fn server_deleted(id: impl Into<String>) -> Self {
        Frame::ServerDeleted { id: id.into() }
    }

    pub fn console_output(
        source: ConsoleSource,
        command: impl Into<String>,
        line: impl Into<String>,
    ) -> Self {
        Frame::ConsoleOutput {
            payload: ConsoleOutput {
                source,
                command: command.into(),
                line: line.into(),
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            payload: ErrorPayload {
                message: message.into(),
            },
        }
    }

    /// Serialized frame bytes, or `None` if encoding fails (logged, never
    /// fatal on a broadcast path).
    pub fn encode(&self) -> Option<Vec<u8>> {
        match serde_json::to_vec(self) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode websocket frame");
                None
            }
        }
    }
}

/// Inbound operator message.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl IncomingMessage {
    /// The `command` string of a command payload, if present and non-empty.
    pub fn command(&self) -> Option<&str> {
        self.payload
            .get("command")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_action_tags() {
        let frame = Frame::server_deleted("abc");
        let json = String::from_utf8(frame.encode().unwrap()).unwrap();
        assert!(json.contains("\"action\":\"server_deleted\""));
        assert!(json.contains("\"id\":\"abc\""));

        let frame = Frame::console_output(ConsoleSource::Docker, "", "[12:00] Done");
        let json = String::from_utf8(frame.encode().unwrap()).unwrap();
        assert!(json.contains("\"action\":\"console_output\""));
        assert!(json.contains("\"source\":\"docker\""));
    }

    #[test]
    fn test_incoming_command_extraction() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"action":"send_rcon_command","payload":{"command":"list"}}"#,
        )
        .unwrap();
        assert_eq!(msg.action, "send_rcon_command");
        assert_eq!(msg.command(), Some("list"));

        let msg: IncomingMessage =
            serde_json::from_str(r#"{"action":"send_rcon_command","payload":{"command":""}}"#)
                .unwrap();
        assert_eq!(msg.command(), None);

        let msg: IncomingMessage =
            serde_json::from_str(r#"{"action":"subscribe_docker_logs"}"#).unwrap();
        assert_eq!(msg.command(), None);
    }
}
