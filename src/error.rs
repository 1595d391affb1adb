//! Connection-level error taxonomy.
//!
//! Decode failures ([`crate::packet::PacketError`]), foreign traffic
//! ([`ConnError::UnexpectedPeer`]) and out-of-state packets
//! ([`ConnError::ProtocolViolation`]) are absorbed inside the engine: logged,
//! datagram dropped.  Everything else is returned to the caller.  Nothing is
//! retried.

use std::net::SocketAddr;

use thiserror::Error;

use crate::socket::SocketError;
use crate::state::{ConnectionState, Role};

#[derive(Debug, Error)]
pub enum ConnError {
    /// Transport failure from the underlying socket.
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// Send attempted on a stream that already finished.
    #[error("stream {0} is already closed")]
    StreamClosed(u64),

    /// Operation reserved for the other role.
    #[error("{op} is not allowed for the {role}")]
    WrongRole { op: &'static str, role: Role },

    /// No socket yet: the responder must `bind` before accepting.
    #[error("connection has no socket; bind first")]
    NotBound,

    /// Operation not valid in the current FSM state.
    #[error("cannot {op} while {state}")]
    BadState {
        op: &'static str,
        state: ConnectionState,
    },

    /// Datagram from another address or carrying another connection id.
    #[error("datagram from unexpected peer {addr} (connection id {connection_id})")]
    UnexpectedPeer { addr: SocketAddr, connection_id: u64 },

    /// Flag combination not expected in the current state.
    #[error("unexpected flags {flags:#08b} while {state}")]
    ProtocolViolation { state: ConnectionState, flags: u8 },
}
