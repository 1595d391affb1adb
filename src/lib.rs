//! `quic-over-udp`: several independent byte streams multiplexed over one
//! UDP "connection", loosely modelled on QUIC.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  frames   ┌────────────────┐
//!  │ StreamSender │──────────▶│ StreamReceiver │──▶ Event
//!  └──────┬───────┘           └───────▲────────┘
//!         │ batch                     │ route by stream id
//!  ┌──────▼───────────────────────────┴────────┐
//!  │               Connection                  │
//!  │  (state machine, pending ACKs, events)    │
//!  └──────┬────────────────────────────────────┘
//!         │ packets (header + frames)
//!  ┌──────▼────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! There is no congestion control, loss recovery, reordering or encryption:
//! the protocol assumes a lossless, in-order network.
//!
//! Each module has a single responsibility:
//! - [`packet`]      : wire format for packets and stream frames
//! - [`stream`]      : per-stream send/receive state and the frame batch
//! - [`event`]       : events surfaced to the driver and their queue
//! - [`state`]       : finite-state-machine types and suspension points
//! - [`connection`]  : handshake, data transfer and close handshake
//! - [`socket`]      : async UDP socket abstraction
//! - [`error`]       : connection error taxonomy
//! - [`config`]      : driver settings
//! - [`server`]      : responder driver serving dummy files
//! - [`client`]      : initiator driver collecting streams

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod packet;
pub mod server;
pub mod socket;
pub mod state;
pub mod stream;

pub use connection::Connection;
pub use error::ConnError;
pub use event::Event;
pub use state::{ConnectionState, Role};
