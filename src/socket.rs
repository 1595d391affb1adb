//! Async UDP socket abstraction.
//!
//! [`Socket`] wraps `tokio::net::UdpSocket` so the connection engine sends
//! and receives whole [`crate::packet::Packet`]s, one per datagram.  It
//! does no peer filtering and keeps no protocol state; a single socket is
//! shared by every stream of a connection.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Packet, PacketError, MAX_DATAGRAM};

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A datagram could not be encoded or decoded.
    #[error("packet codec error: {0}")]
    Packet(#[from] PacketError),
}

/// An async, packet-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// The responder binds its well-known port here; the initiator passes
    /// port `0` and lets the OS pick, reporting the result in `local_addr`.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        Ok(Self {
            local_addr: inner.local_addr()?,
            inner,
        })
    }

    /// Send `packet` to `dest` as exactly one datagram.
    ///
    /// A packet whose frames would push it past [`MAX_DATAGRAM`] fails with
    /// [`SocketError::Packet`] before anything reaches the wire.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        let datagram = packet.encode()?;
        let sent = self.inner.send_to(&datagram, dest).await?;
        log::trace!(
            "[udp] {} -> {dest}: {sent} bytes, {} frame(s)",
            self.local_addr,
            packet.frames.len()
        );
        Ok(())
    }

    /// Wait for the next datagram from any address and decode it.
    ///
    /// The sender's address is returned alongside the packet; checking it
    /// against the connection's peer is left to `Connection::recv_one`,
    /// which also logs and drops datagrams that fail here with
    /// [`SocketError::Packet`].  Only [`SocketError::Io`] is fatal.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut datagram = vec![0u8; MAX_DATAGRAM];
        let (len, from) = self.inner.recv_from(&mut datagram).await?;
        log::trace!("[udp] {} <- {from}: {len} bytes", self.local_addr);
        Ok((Packet::decode(&datagram[..len])?, from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{flags, Frame};

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn undecodable_datagram_surfaces_as_packet_error() {
        let rx = Socket::bind(loopback()).await.unwrap();
        let tx = UdpSocket::bind(loopback()).await.unwrap();
        tx.send_to(&[0u8; 5], rx.local_addr).await.unwrap();

        assert!(matches!(rx.recv_from().await, Err(SocketError::Packet(_))));
    }

    #[tokio::test]
    async fn oversized_packet_is_never_sent() {
        let tx = Socket::bind(loopback()).await.unwrap();
        let rx = Socket::bind(loopback()).await.unwrap();
        let huge = Packet {
            flags: flags::STREAM_DATA,
            connection_id: 9,
            packet_number: 1,
            frames: vec![Frame {
                stream_id: 0,
                offset: 0,
                payload: vec![0u8; MAX_DATAGRAM],
                fin: false,
            }],
        };
        assert!(matches!(
            tx.send_to(&huge, rx.local_addr).await,
            Err(SocketError::Packet(PacketError::Oversized { .. }))
        ));

        let ack = Packet::control(flags::ACK, 9, 1);
        tx.send_to(&ack, rx.local_addr).await.unwrap();
        let (got, from) = rx.recv_from().await.unwrap();
        assert_eq!(got, ack);
        assert_eq!(from, tx.local_addr);
    }
}
