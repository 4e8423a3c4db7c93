//! WebSocket session endpoints
//!
//! Each connection becomes a hub session with two pumps: the write pump
//! drains the bounded outbox to the socket (with a periodic ping), the read
//! pump ingests operator actions under a rolling deadline. When either pump
//! exits the session is unregistered, which also cancels any attached log
//! stream.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use ender_manager::{ConsoleSource, Frame, IncomingMessage, SessionId, GLOBAL_TOPIC};

use crate::auth::AuthUser;
use crate::state::AppState;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(54);
const READ_DEADLINE: Duration = Duration::from_secs(60);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Upgrade to a session subscribed to the global topic.
pub async fn ws_global(
    user: AuthUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_session(state, socket, GLOBAL_TOPIC.to_string(), user))
}

/// Upgrade to a session bound to one server.
pub async fn ws_server(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_session(state, socket, id, user))
}

async fn run_session(state: AppState, socket: WebSocket, topic: String, user: AuthUser) {
    let (session_id, mut outbox) = state.hub.register(&topic);
    tracing::info!(session = session_id, topic = %topic,
        operator = %user.claims.username, "operator session established");
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Write pump: outbox -> socket, with keepalive pings.
    let mut write_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = outbox.recv() => {
                    let Some(bytes) = frame else { break };
                    let text = match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => continue,
                    };
                    match tokio::time::timeout(WRITE_TIMEOUT, ws_tx.send(Message::Text(text.into()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                _ = ping.tick() => {
                    let ping_sent = tokio::time::timeout(
                        WRITE_TIMEOUT,
                        ws_tx.send(Message::Ping(Vec::new().into())),
                    )
                    .await;
                    if !matches!(ping_sent, Ok(Ok(()))) {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Read pump: socket -> action dispatch, rolling 60 s deadline extended
    // by any inbound frame (pongs included).
    loop {
        tokio::select! {
            _ = &mut write_task => break,
            inbound = tokio::time::timeout(READ_DEADLINE, ws_rx.next()) => {
                match inbound {
                    Err(_) => break, // deadline passed with nothing inbound
                    Ok(None) => break,
                    Ok(Some(Err(_))) => break,
                    Ok(Some(Ok(Message::Text(text)))) => {
                        handle_incoming(&state, session_id, &topic, text.as_str()).await;
                    }
                    Ok(Some(Ok(Message::Close(_)))) => break,
                    Ok(Some(Ok(_))) => {} // ping/pong/binary keep the session alive
                }
            }
        }
    }

    write_task.abort();
    state.hub.unregister(session_id);
}

async fn handle_incoming(state: &AppState, session_id: SessionId, topic: &str, text: &str) {
    let message: IncomingMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(session = session_id, error = %e,
                "undecodable websocket message");
            state
                .hub
                .send(session_id, &Frame::error("Invalid message format"));
            return;
        }
    };

    match message.action.as_str() {
        "subscribe_docker_logs" => {
            tracing::info!(session = session_id, server_id = %topic,
                "session subscribed to container logs");
            let Some(outbox) = state.hub.sender(session_id) else {
                return;
            };
            let manager = state.manager.clone();
            let server_id = topic.to_string();
            let task = tokio::spawn(async move {
                manager.stream_logs(&server_id, outbox).await;
            });
            state.hub.set_log_task(session_id, task);
        }
        "unsubscribe_docker_logs" => {
            tracing::info!(session = session_id, server_id = %topic,
                "session unsubscribed from container logs");
            state.hub.clear_log_task(session_id);
        }
        "send_rcon_command" => {
            run_command(state, session_id, topic, &message, ConsoleSource::Rcon).await;
        }
        "send_terminal_command" => {
            run_command(state, session_id, topic, &message, ConsoleSource::Terminal).await;
        }
        other => {
            tracing::warn!(session = session_id, action = %other,
                "unknown websocket action");
            state
                .hub
                .send(session_id, &Frame::error(format!("Unknown action: {other}")));
        }
    }
}

async fn run_command(
    state: &AppState,
    session_id: SessionId,
    topic: &str,
    message: &IncomingMessage,
    source: ConsoleSource,
) {
    let Some(command) = message.command() else {
        state.hub.send(
            session_id,
            &Frame::error("Invalid or empty command in payload"),
        );
        return;
    };

    let result = tokio::time::timeout(COMMAND_TIMEOUT, async {
        match source {
            ConsoleSource::Terminal => state.manager.exec_terminal(topic, command).await,
            _ => state.manager.send_command(topic, command).await,
        }
    })
    .await;

    match result {
        Ok(Ok(transcript)) => {
            state
                .hub
                .send(session_id, &Frame::console_output(source, command, transcript));
        }
        Ok(Err(e)) => {
            tracing::error!(session = session_id, server_id = %topic,
                command = %command, error = %e, "failed to execute command");
            state.hub.send(session_id, &Frame::error(e.to_string()));
        }
        Err(_) => {
            state
                .hub
                .send(session_id, &Frame::error("Command timed out"));
        }
    }
}
