//! Host port allocation
//!
//! Trial-binds TCP ports upward from a base until one is free. Two
//! overlapping calls can race; the container-create path handles the
//! resulting port conflict by re-allocating.

use std::net::TcpListener;

use crate::error::{ManagerError, Result};

/// Default base for game-port allocation.
pub const GAME_PORT_BASE: u16 = 25565;

/// Default base for RCON-port allocation.
pub const RCON_PORT_BASE: u16 = 25575;

/// First port at or above `start` (up to 65534) that accepts a bind.
pub fn find_available_port(start: u16) -> Result<u16> {
    for port in start..u16::MAX {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    Err(ManagerError::NoFreePort)
}
