//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy, the role it was created with, and the points at which it may be
//! suspended waiting for the peer.  Transitions live in
//! [`crate::connection`].
//!
//! ```text
//!  IDLE ──start sent / received──▶ HANDSHAKING ──ACK──▶ ESTABLISHED
//!                                                            │
//!                                          FIN sent / rcvd   │
//!                                                            ▼
//!                                  CLOSED ◀──final ACK─── CLOSING
//! ```
//!
//! The machine is linear: no state is ever re-entered.

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ConnectionState {
    /// Created; nothing sent or received yet.
    #[default]
    Idle,
    /// Start-connection exchange in progress.
    Handshaking,
    /// Connection id agreed; streams may carry data.
    Established,
    /// FIN sent or received; close handshake in progress.
    Closing,
    /// Close handshake complete.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Handshaking => "handshaking",
            Self::Established => "established",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which end of the handshake a connection plays.  Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client: `connect`s and sends the first start-connection packet.
    Initiator,
    /// Server: `bind`s and `accept_connection`s.
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => f.write_str("initiator"),
            Self::Responder => f.write_str("responder"),
        }
    }
}

/// A named suspension point: what the connection is blocked on.
///
/// None of these waits has a timeout.  An unresponsive peer keeps the
/// connection suspended indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Initiator sent start-connection; awaiting the responder's reply.
    HandshakeReply,
    /// Responder sent its connection id; awaiting the initiator's ACK.
    HandshakeAck,
    /// A data packet is in flight; awaiting the ACK for this packet number.
    BatchAck(u32),
    /// FIN sent; awaiting FIN_ACK.
    FinAck,
    /// FIN_ACK with this packet number sent; awaiting the final ACK.
    CloseAck(u32),
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeReply => f.write_str("awaiting handshake reply"),
            Self::HandshakeAck => f.write_str("awaiting handshake ACK"),
            Self::BatchAck(pn) => write!(f, "awaiting batch ACK for pn={pn}"),
            Self::FinAck => f.write_str("awaiting FIN_ACK"),
            Self::CloseAck(pn) => write!(f, "awaiting close-ACK for pn={pn}"),
        }
    }
}
