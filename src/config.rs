//! Driver configuration.
//!
//! The engine itself has no tunables; these structs carry what the `server`
//! and `client` drivers need.  `main.rs` fills them from the command line.

use std::net::SocketAddr;

use anyhow::{ensure, Result};

use crate::packet::{FRAME_HEADER_LEN, MAX_DATAGRAM, PACKET_HEADER_LEN};

/// Largest payload a single frame can carry in a one-frame packet.
pub const MAX_FRAME_PAYLOAD: usize = MAX_DATAGRAM - PACKET_HEADER_LEN - FRAME_HEADER_LEN;

/// Settings for [`crate::server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address to bind.
    pub bind: SocketAddr,
    /// Size of the dummy file served on every stream, in bytes.
    pub file_size: usize,
    /// Smallest frame payload; each stream picks its size in `min..=max`.
    pub min_frame: usize,
    /// Largest frame payload.
    pub max_frame: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 12345)),
            file_size: 2 * 1024 * 1024,
            min_frame: 1000,
            max_frame: 2000,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.min_frame > 0, "min frame size must be positive");
        ensure!(
            self.min_frame <= self.max_frame,
            "min frame size {} exceeds max frame size {}",
            self.min_frame,
            self.max_frame
        );
        ensure!(
            self.max_frame <= MAX_FRAME_PAYLOAD,
            "max frame size {} does not fit a {MAX_DATAGRAM}-byte datagram",
            self.max_frame
        );
        Ok(())
    }

    /// Most streams whose batch of full-size frames still fits one datagram.
    pub fn max_streams(&self) -> usize {
        let per_frame = FRAME_HEADER_LEN + self.max_frame;
        let frames = (MAX_DATAGRAM - PACKET_HEADER_LEN) / per_frame;
        // A batch holds ceil(3/5 × n) frames.
        frames * 5 / 3
    }
}

/// Settings for [`crate::client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to connect to.
    pub server: SocketAddr,
    /// Number of streams to request.
    pub streams: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from(([127, 0, 0, 1], 12345)),
            streams: 5,
        }
    }
}
