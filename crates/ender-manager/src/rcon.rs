//! Minimal RCON client
//!
//! Implements the well-known remote-console TCP protocol game servers speak:
//! length-prefixed little-endian packets carrying an id, a type and a
//! NUL-terminated body. Only what the control plane needs — authenticate,
//! execute, read the response.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const TYPE_AUTH: i32 = 3;
const TYPE_EXEC: i32 = 2;
// The auth reply shares the exec request's type value; they are
// distinguished by direction.
const TYPE_AUTH_RESPONSE: i32 = 2;

/// Packets above this size are not something a game server sends.
const MAX_PACKET_SIZE: i32 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("authentication rejected")]
    AuthFailed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub(crate) async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    id: i32,
    packet_type: i32,
    body: &str,
) -> Result<(), RconError> {
    // id + type + body + two NUL terminators
    let length = 4 + 4 + body.len() as i32 + 2;
    let mut packet = Vec::with_capacity(length as usize + 4);
    packet.extend_from_slice(&length.to_le_bytes());
    packet.extend_from_slice(&id.to_le_bytes());
    packet.extend_from_slice(&packet_type.to_le_bytes());
    packet.extend_from_slice(body.as_bytes());
    packet.extend_from_slice(&[0, 0]);

    writer.write_all(&packet).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(i32, i32, String), RconError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let length = i32::from_le_bytes(header);
    if !(10..=MAX_PACKET_SIZE).contains(&length) {
        return Err(RconError::Protocol(format!("bad packet length {length}")));
    }

    let mut buf = vec![0u8; length as usize];
    reader.read_exact(&mut buf).await?;

    let id = i32::from_le_bytes(buf[0..4].try_into().expect("4-byte slice"));
    let packet_type = i32::from_le_bytes(buf[4..8].try_into().expect("4-byte slice"));
    let body_end = buf.len().saturating_sub(2);
    let body = String::from_utf8_lossy(&buf[8..body_end]).into_owned();

    Ok((id, packet_type, body))
}

/// An authenticated RCON session.
pub struct RconClient<S = TcpStream> {
    stream: S,
    next_id: i32,
}

impl RconClient<TcpStream> {
    /// Dial `addr` and authenticate with `password`.
    pub async fn connect(addr: &str, password: &str) -> Result<Self, RconError> {
        let stream = TcpStream::connect(addr).await?;
        Self::handshake(stream, password).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> RconClient<S> {
    /// Authenticate over an established stream.
    pub async fn handshake(mut stream: S, password: &str) -> Result<Self, RconError> {
        write_packet(&mut stream, 1, TYPE_AUTH, password).await?;

        // Some servers send an empty response-value packet before the auth
        // reply; skip anything that is not the reply itself.
        loop {
            let (id, packet_type, _body) = read_packet(&mut stream).await?;
            if id == -1 {
                return Err(RconError::AuthFailed);
            }
            if packet_type == TYPE_AUTH_RESPONSE {
                return Ok(Self { stream, next_id: 2 });
            }
        }
    }

    /// Run a command and return the server's transcript.
    pub async fn execute(&mut self, command: &str) -> Result<String, RconError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        write_packet(&mut self.stream, id, TYPE_EXEC, command).await?;

        let (reply_id, _packet_type, body) = read_packet(&mut self.stream).await?;
        if reply_id != id {
            return Err(RconError::Protocol(format!(
                "response id {reply_id} does not match request id {id}"
            )));
        }
        Ok(body)
    }
}

/// Capability seam over RCON dialing so the command broker and the readiness
/// prober can be tested without a socket.
#[async_trait]
pub trait RconDialer: Send + Sync {
    /// Connect, authenticate and disconnect. Success means the server's
    /// remote console is accepting commands.
    async fn probe(&self, addr: &str, password: &str) -> Result<(), RconError>;

    /// Connect, authenticate, run one command and return the transcript.
    async fn execute(&self, addr: &str, password: &str, command: &str)
        -> Result<String, RconError>;
}

/// The real dialer.
pub struct TcpRconDialer;

#[async_trait]
impl RconDialer for TcpRconDialer {
    async fn probe(&self, addr: &str, password: &str) -> Result<(), RconError> {
        RconClient::connect(addr, password).await.map(|_| ())
    }

    async fn execute(
        &self,
        addr: &str,
        password: &str,
        command: &str,
    ) -> Result<String, RconError> {
        let mut client = RconClient::connect(addr, password).await?;
        client.execute(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_packet_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_packet(&mut a, 7, TYPE_EXEC, "say hello").await.unwrap();

        let (id, packet_type, body) = read_packet(&mut b).await.unwrap();
        assert_eq!(id, 7);
        assert_eq!(packet_type, TYPE_EXEC);
        assert_eq!(body, "say hello");
    }

    #[tokio::test]
    async fn test_packet_empty_body() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_packet(&mut a, 1, TYPE_AUTH, "").await.unwrap();

        let (id, packet_type, body) = read_packet(&mut b).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(packet_type, TYPE_AUTH);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_bad_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(-5i32).to_le_bytes()).await.unwrap();
        assert!(matches!(
            read_packet(&mut b).await,
            Err(RconError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_and_execute() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            // Auth request
            let (id, packet_type, body) = read_packet(&mut server_side).await.unwrap();
            assert_eq!(packet_type, TYPE_AUTH);
            assert_eq!(body, "hunter2");
            write_packet(&mut server_side, id, TYPE_AUTH_RESPONSE, "")
                .await
                .unwrap();

            // Exec request
            let (id, packet_type, body) = read_packet(&mut server_side).await.unwrap();
            assert_eq!(packet_type, TYPE_EXEC);
            assert_eq!(body, "list");
            write_packet(&mut server_side, id, 0, "There are 0 of a max of 20 players online:")
                .await
                .unwrap();
        });

        let mut client = RconClient::handshake(client_side, "hunter2").await.unwrap();
        let transcript = client.execute("list").await.unwrap();
        assert!(transcript.starts_with("There are 0"));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            let (_id, _packet_type, _body) = read_packet(&mut server_side).await.unwrap();
            // id -1 signals a bad password
            write_packet(&mut server_side, -1, TYPE_AUTH, "").await.unwrap();
        });

        let result = RconClient::handshake(client_side, "wrong").await;
        assert!(matches!(result, Err(RconError::AuthFailed)));
        server.await.unwrap();
    }
}
