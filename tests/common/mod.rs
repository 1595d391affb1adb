//! Shared helpers for the integration tests.
//!
//! Everything runs on loopback.  Engine calls are wrapped in
//! `tokio::time::timeout` by the tests because the engine itself never
//! times out.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use quic_over_udp::packet::{flags, Packet, MAX_DATAGRAM};
use quic_over_udp::{Connection, Role};

pub const LIMIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(150);

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Handshake a real initiator with a real responder on loopback.
///
/// Returns `(client, server)`, both `Established`.
pub async fn established_pair() -> (Connection, Connection) {
    let mut server = Connection::new(Role::Responder);
    server.bind(loopback()).await.expect("bind server");
    let server_addr = server.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let accepted = server.accept_connection().await;
        accepted.map(|()| server)
    });

    let mut client = Connection::new(Role::Initiator);
    timeout(LIMIT, client.connect(server_addr))
        .await
        .expect("client connect timed out")
        .expect("client connect failed");

    let server = timeout(LIMIT, server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked")
        .expect("server accept failed");

    (client, server)
}

/// A raw UDP socket that plays the peer by hand.
pub struct Scripted {
    pub sock: UdpSocket,
    pub addr: SocketAddr,
}

impl Scripted {
    pub async fn bind() -> Self {
        let sock = UdpSocket::bind(loopback()).await.expect("bind raw peer");
        let addr = sock.local_addr().unwrap();
        Self { sock, addr }
    }

    pub async fn recv(&self) -> (Packet, SocketAddr) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, from) = timeout(LIMIT, self.sock.recv_from(&mut buf))
            .await
            .expect("scripted peer recv timed out")
            .expect("scripted peer recv failed");
        (Packet::decode(&buf[..n]).expect("engine sent a malformed packet"), from)
    }

    /// `true` when nothing arrives within [`QUIET`].
    pub async fn is_quiet(&self) -> bool {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        timeout(QUIET, self.sock.recv_from(&mut buf)).await.is_err()
    }

    pub async fn send(&self, packet: &Packet, to: SocketAddr) {
        self.send_raw(&packet.encode().unwrap(), to).await;
    }

    pub async fn send_raw(&self, bytes: &[u8], to: SocketAddr) {
        self.sock.send_to(bytes, to).await.expect("scripted peer send");
    }
}

/// Handshake a real initiator against a scripted responder that assigns
/// `connection_id`.  Returns the client, the script and the client's address.
pub async fn scripted_server(connection_id: u64) -> (Connection, Scripted, SocketAddr) {
    let peer = Scripted::bind().await;
    let mut client = Connection::new(Role::Initiator);

    let script = async {
        let (start, from) = peer.recv().await;
        assert!(start.has(flags::START_CONNECTION));
        peer.send(
            &Packet::control(flags::START_CONNECTION, connection_id, 0),
            from,
        )
        .await;
        let (ack, _) = peer.recv().await;
        assert!(ack.has(flags::ACK));
        from
    };

    let (connected, client_addr) = tokio::join!(client.connect(peer.addr), script);
    connected.expect("client connect failed");
    (client, peer, client_addr)
}
