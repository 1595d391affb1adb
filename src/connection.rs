//! Connection engine: handshake, batched stream transfer, close handshake.
//!
//! # Architecture
//!
//! ```text
//!  Driver
//!    │  connect / accept_connection / request_streams
//!    │  send / flush / receive_step / close
//!    ▼
//!  Connection ──────────────▶ EventQueue ──▶ Driver drains events
//!    ├── StreamTable  (senders, receivers, closed ids, frame batch)
//!    ├── pending_ack  (data packet numbers not yet ACKed)
//!    └── Socket       (one UDP socket, 65535-byte datagrams)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let mut client = Connection::new(Role::Initiator);
//! client.connect(server_addr).await?;
//! client.request_streams(3).await?;
//! while client.closed_stream_count() < 3 {
//!     client.receive_step().await?;
//!     for event in client.drain_events() {
//!         // ...
//!     }
//! }
//! client.close().await?;
//! ```
//!
//! # Suspension points
//!
//! Several operations wait on the peer before returning; each wait is a
//! named [`Wait`] visible through [`Connection::waiting`]:
//!
//! | Operation             | Wait                  |
//! |-----------------------|-----------------------|
//! | `connect`             | `HandshakeReply`      |
//! | `accept_connection`   | `HandshakeAck`        |
//! | `send` / `flush`      | `BatchAck(pn)`        |
//! | `close`               | `FinAck`              |
//! | FIN in `receive_step` | `CloseAck(pn)`        |
//!
//! No wait has a timeout and nothing is retransmitted: the engine assumes a
//! lossless, in-order network and stalls forever on a silent peer.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use rand::Rng;

use crate::error::ConnError;
use crate::event::{Event, EventQueue};
use crate::packet::{flags, Frame, Packet};
use crate::socket::{Socket, SocketError};
use crate::state::{ConnectionState, Role, Wait};
use crate::stream::{Stream, StreamTable};

/// Connection id carried before the responder assigns one.
const UNASSIGNED_ID: u64 = 0;

/// Stream that carries the stream-request count.
const REQUEST_STREAM_ID: u64 = 0;

/// One end of a connection.
pub struct Connection {
    role: Role,
    state: ConnectionState,
    socket: Option<Socket>,
    peer: Option<SocketAddr>,
    /// Assigned once during the handshake, then checked on every datagram.
    connection_id: u64,
    /// Packet number for the next packet this side originates.
    next_pn: u32,
    /// Data packets sent but not yet acknowledged.
    pending_ack: HashSet<u32>,
    streams: StreamTable,
    events: EventQueue,
    waiting: Option<Wait>,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Create an idle connection.  The role cannot change afterwards.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: ConnectionState::Idle,
            socket: None,
            peer: None,
            connection_id: UNASSIGNED_ID,
            next_pn: 0,
            pending_ack: HashSet::new(),
            streams: StreamTable::new(),
            events: EventQueue::new(),
            waiting: None,
        }
    }

    /// Bind the responder's socket to `addr`.
    pub async fn bind(&mut self, addr: SocketAddr) -> Result<(), ConnError> {
        self.require_role(Role::Responder, "bind")?;
        let socket = Socket::bind(addr).await?;
        log::info!("[quic] bound to {}", socket.local_addr);
        self.socket = Some(socket);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: send start-connection and adopt the responder's id.
    ///
    /// Binds an ephemeral local socket first.  Returns once the ACK for the
    /// responder's reply has been sent.
    pub async fn connect(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        self.require_role(Role::Initiator, "connect")?;
        self.require_state(ConnectionState::Idle, "connect")?;

        if self.socket.is_none() {
            let local: SocketAddr = if peer.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };
            self.socket = Some(Socket::bind(local).await?);
        }
        self.peer = Some(peer);

        let pn = self.take_packet_number();
        self.transmit(&Packet::control(flags::START_CONNECTION, UNASSIGNED_ID, pn))
            .await?;
        self.enter(ConnectionState::Handshaking);
        log::debug!("[quic] → START pn={pn} to {peer}");

        self.waiting = Some(Wait::HandshakeReply);
        loop {
            // The reply carries the id we do not know yet; match on address only.
            let Some(reply) = self.recv_one(false).await? else {
                continue;
            };
            if !reply.has(flags::START_CONNECTION) {
                self.absorb_violation(&reply);
                continue;
            }

            self.connection_id = reply.connection_id;
            log::info!("[quic] connection id {} assigned", self.connection_id);
            self.send_ack(reply.packet_number).await?;
            break;
        }
        self.waiting = None;
        self.enter(ConnectionState::Established);
        Ok(())
    }

    /// Passive open: wait for a start-connection packet, assign a fresh
    /// connection id and wait for the initiator's ACK.
    pub async fn accept_connection(&mut self) -> Result<(), ConnError> {
        self.require_role(Role::Responder, "accept_connection")?;
        self.require_state(ConnectionState::Idle, "accept_connection")?;
        let socket = self.socket.as_ref().ok_or(ConnError::NotBound)?;

        let peer = loop {
            match socket.recv_from().await {
                Ok((pkt, addr)) if pkt.has(flags::START_CONNECTION) => break addr,
                Ok((pkt, addr)) => {
                    log::warn!(
                        "[quic] ignoring flags {:#08b} from {addr} before handshake",
                        pkt.flags
                    );
                }
                Err(SocketError::Packet(e)) => log::warn!("[quic] dropped datagram: {e}"),
                Err(e) => return Err(e.into()),
            }
        };

        self.peer = Some(peer);
        self.connection_id = rand::rng().random_range(1..=u64::MAX);
        self.enter(ConnectionState::Handshaking);
        log::info!(
            "[quic] ← START from {peer}; assigned connection id {}",
            self.connection_id
        );

        let pn = self.take_packet_number();
        self.transmit(&Packet::control(
            flags::START_CONNECTION,
            self.connection_id,
            pn,
        ))
        .await?;

        self.waiting = Some(Wait::HandshakeAck);
        loop {
            let Some(pkt) = self.recv_one(true).await? else {
                continue;
            };
            if pkt.has(flags::ACK) {
                break;
            }
            self.absorb_violation(&pkt);
        }
        self.waiting = None;
        self.enter(ConnectionState::Established);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Ask the server for `count` streams.
    pub async fn request_streams(&mut self, count: u32) -> Result<(), ConnError> {
        self.require_role(Role::Initiator, "request_streams")?;
        self.require_state(ConnectionState::Established, "request_streams")?;

        let pn = self.take_packet_number();
        let request = Packet {
            flags: flags::STREAM_REQUEST,
            connection_id: self.connection_id,
            packet_number: pn,
            frames: vec![Frame {
                stream_id: REQUEST_STREAM_ID,
                offset: 0,
                payload: count.to_be_bytes().to_vec(),
                fin: true,
            }],
        };
        self.transmit(&request).await?;
        log::info!("[quic] → STREAM_REQUEST count={count} pn={pn}");
        Ok(())
    }

    /// Register streams up front so the batching threshold counts them.
    pub fn open_streams(&mut self, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            self.streams.open(id);
        }
    }

    /// Queue `data` on `stream_id`, flushing when the batch is full.
    ///
    /// A flush waits for the peer's ACK before returning; inbound packets
    /// that arrive meanwhile are dispatched as in [`receive_step`] and their
    /// events queued.
    ///
    /// [`receive_step`]: Connection::receive_step
    pub async fn send(
        &mut self,
        stream_id: u64,
        data: Vec<u8>,
        end_of_stream: bool,
    ) -> Result<(), ConnError> {
        self.require_state(ConnectionState::Established, "send")?;
        if self.streams.queue_send(stream_id, data, end_of_stream)? {
            self.flush().await?;
        }
        Ok(())
    }

    /// Pack every queued frame into one packet, send it and wait for its ACK.
    pub async fn flush(&mut self) -> Result<(), ConnError> {
        self.require_state(ConnectionState::Established, "flush")?;
        if self.streams.queued() == 0 {
            return Ok(());
        }

        let frames = self.streams.take_batch();
        let pn = self.take_packet_number();
        let packet = Packet {
            flags: flags::STREAM_DATA,
            connection_id: self.connection_id,
            packet_number: pn,
            frames,
        };
        self.transmit(&packet).await?;
        self.pending_ack.insert(pn);
        log::debug!(
            "[quic] → DATA pn={pn} frames={} bytes={}",
            packet.frames.len(),
            packet.encoded_len()
        );

        self.waiting = Some(Wait::BatchAck(pn));
        while self.pending_ack.contains(&pn) && self.state == ConnectionState::Established {
            if let Some(pkt) = self.recv_one(true).await? {
                self.dispatch(pkt).await?;
            }
        }
        self.waiting = None;
        Ok(())
    }

    /// Receive one datagram and dispatch it.
    ///
    /// Returns the number of events it queued; drain them with
    /// [`poll_event`](Connection::poll_event) or
    /// [`drain_events`](Connection::drain_events).  A datagram from a foreign
    /// address, with a foreign connection id or failing to decode is dropped
    /// and yields `0`.
    pub async fn receive_step(&mut self) -> Result<usize, ConnError> {
        self.require_state(ConnectionState::Established, "receive")?;
        let before = self.events.len();
        if let Some(pkt) = self.recv_one(true).await? {
            self.dispatch(pkt).await?;
        }
        Ok(self.events.len() - before)
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    /// Graceful close: send FIN, wait for FIN_ACK, answer with a final ACK.
    ///
    /// Frames still queued below the batching threshold are flushed first.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        self.require_state(ConnectionState::Established, "close")?;
        self.flush().await?;
        if self.state != ConnectionState::Established {
            // The peer closed first while we waited for the flush ACK.
            return Ok(());
        }

        let pn = self.take_packet_number();
        self.transmit(&Packet::control(flags::FIN, self.connection_id, pn))
            .await?;
        self.enter(ConnectionState::Closing);
        log::debug!("[quic] → FIN pn={pn}");

        self.waiting = Some(Wait::FinAck);
        loop {
            let Some(pkt) = self.recv_one(true).await? else {
                continue;
            };
            if pkt.has(flags::FIN_ACK) {
                log::debug!("[quic] ← FIN_ACK pn={}", pkt.packet_number);
                self.send_ack(pkt.packet_number).await?;
                break;
            }
            self.absorb_violation(&pkt);
        }
        self.waiting = None;
        self.enter(ConnectionState::Closed);
        Ok(())
    }

    /// Peer sent FIN: answer FIN_ACK and wait for the final ACK.
    async fn respond_to_fin(&mut self) -> Result<(), ConnError> {
        log::debug!("[quic] ← FIN for connection {}", self.connection_id);
        self.enter(ConnectionState::Closing);

        let pn = self.take_packet_number();
        self.transmit(&Packet::control(flags::FIN_ACK, self.connection_id, pn))
            .await?;
        log::debug!("[quic] → FIN_ACK pn={pn}");

        self.waiting = Some(Wait::CloseAck(pn));
        loop {
            let Some(pkt) = self.recv_one(true).await? else {
                continue;
            };
            if pkt.has(flags::ACK) && pkt.packet_number == pn {
                break;
            }
            self.absorb_violation(&pkt);
        }
        self.waiting = None;
        self.enter(ConnectionState::Closed);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The agreed connection id, `0` before the handshake assigns one.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(|s| s.local_addr)
    }

    /// What the connection is currently suspended on, if anything.
    pub fn waiting(&self) -> Option<Wait> {
        self.waiting
    }

    pub fn stream(&self, id: u64) -> Option<&Stream> {
        self.streams.get(id)
    }

    /// Streams that finished, in either direction.
    pub fn closed_stream_count(&self) -> usize {
        self.streams.closed_count()
    }

    pub fn open_stream_count(&self) -> usize {
        self.streams.open_count()
    }

    /// Frames queued for the next data packet.
    pub fn queued_frames(&self) -> usize {
        self.streams.queued()
    }

    /// Data packets sent and not yet acknowledged.
    pub fn pending_acks(&self) -> usize {
        self.pending_ack.len()
    }

    /// Take the oldest queued event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop()
    }

    /// Take every queued event, oldest first.
    pub fn drain_events(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.events.drain()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Route one validated packet.
    ///
    /// Priority: FIN, stream request, ACK of a pending packet, stream data.
    async fn dispatch(&mut self, pkt: Packet) -> Result<(), ConnError> {
        if pkt.has(flags::FIN) {
            return self.respond_to_fin().await;
        }

        if pkt.has(flags::STREAM_REQUEST) {
            self.handle_stream_request(&pkt);
            return Ok(());
        }

        if pkt.has(flags::ACK) {
            if self.pending_ack.remove(&pkt.packet_number) {
                log::debug!("[quic] ← ACK pn={}", pkt.packet_number);
                self.events.push(Event::AckReceived {
                    packet_number: pkt.packet_number,
                });
            } else {
                self.absorb_violation(&pkt);
            }
            return Ok(());
        }

        if pkt.has(flags::START_CONNECTION) || pkt.has(flags::FIN_ACK) {
            self.absorb_violation(&pkt);
            return Ok(());
        }

        let pn = pkt.packet_number;
        log::debug!("[quic] ← DATA pn={pn} frames={}", pkt.frames.len());
        for frame in pkt.frames {
            match self.streams.deliver(frame) {
                Ok(event) => self.events.push(event),
                Err(e) => log::warn!("[quic] skipping frame: {e}"),
            }
        }
        self.send_ack(pn).await
    }

    fn handle_stream_request(&mut self, pkt: &Packet) {
        let count = pkt
            .frames
            .first()
            .and_then(|f| <[u8; 4]>::try_from(f.payload.as_slice()).ok())
            .map(u32::from_be_bytes);

        match count {
            Some(num_streams) => {
                log::info!("[quic] ← STREAM_REQUEST count={num_streams}");
                self.events.push(Event::StreamRequest { num_streams });
            }
            None => self.absorb_violation(pkt),
        }
    }

    /// Read one datagram.  Returns `None` when it was dropped: undecodable,
    /// from another address, or (with `check_id`) for another connection.
    async fn recv_one(&self, check_id: bool) -> Result<Option<Packet>, ConnError> {
        let socket = self.socket.as_ref().ok_or(ConnError::NotBound)?;
        let (pkt, addr) = match socket.recv_from().await {
            Ok(v) => v,
            Err(SocketError::Packet(e)) => {
                log::warn!("[quic] dropped datagram: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let foreign_addr = self.peer != Some(addr);
        let foreign_id = check_id && pkt.connection_id != self.connection_id;
        if foreign_addr || foreign_id {
            let e = ConnError::UnexpectedPeer {
                addr,
                connection_id: pkt.connection_id,
            };
            log::warn!("[quic] dropped: {e}");
            return Ok(None);
        }
        Ok(Some(pkt))
    }

    async fn send_ack(&self, packet_number: u32) -> Result<(), ConnError> {
        self.transmit(&Packet::control(flags::ACK, self.connection_id, packet_number))
            .await?;
        log::debug!("[quic] → ACK pn={packet_number}");
        Ok(())
    }

    async fn transmit(&self, packet: &Packet) -> Result<(), ConnError> {
        let socket = self.socket.as_ref().ok_or(ConnError::NotBound)?;
        let peer = self.peer.ok_or(ConnError::BadState {
            op: "transmit",
            state: self.state,
        })?;
        socket.send_to(packet, peer).await?;
        Ok(())
    }

    fn take_packet_number(&mut self) -> u32 {
        let pn = self.next_pn;
        self.next_pn = self.next_pn.wrapping_add(1);
        pn
    }

    fn absorb_violation(&self, pkt: &Packet) {
        let e = ConnError::ProtocolViolation {
            state: self.state,
            flags: pkt.flags,
        };
        match self.waiting {
            Some(wait) => log::warn!("[quic] ignored while {wait}: {e}"),
            None => log::warn!("[quic] ignored: {e}"),
        }
    }

    fn enter(&mut self, next: ConnectionState) {
        debug_assert!(next >= self.state, "{} -> {next}", self.state);
        if next != self.state {
            log::info!("[quic] {} -> {next}", self.state);
            self.state = next;
        }
    }

    fn require_role(&self, role: Role, op: &'static str) -> Result<(), ConnError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ConnError::WrongRole {
                op,
                role: self.role,
            })
        }
    }

    fn require_state(&self, state: ConnectionState, op: &'static str) -> Result<(), ConnError> {
        if self.state == state {
            Ok(())
        } else {
            Err(ConnError::BadState {
                op,
                state: self.state,
            })
        }
    }
}
