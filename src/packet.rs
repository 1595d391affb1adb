//! Wire-format definitions for packets and stream frames.
//!
//! Every datagram exchanged between peers is a [`Packet`]: a fixed header
//! followed by zero or more [`Frame`]s.  This module is responsible for:
//! - Defining the on-wire binary layout (header fields, flags, frames).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//! Packet header (13 bytes)
//! +--------+------------------------------+----------------+
//! | flags  |        connection_id         | packet_number  |
//! |   1    |              8               |       4        |
//! +--------+------------------------------+----------------+
//! | frame 0 | frame 1 | ...                                |
//! +--------------------------------------------------------+
//!
//! Frame (17-byte header + payload)
//! +--------+------------------------------+--------+--------+---------+
//! | flags  |          stream_id           | offset | length | payload |
//! |   1    |              8               |   4    |   4    | length  |
//! +--------+------------------------------+--------+--------+---------+
//! ```

use thiserror::Error;

/// Bit-flag constants for the packet-level `flags` header field.
pub mod flags {
    /// Client asks the server for a number of streams.
    pub const STREAM_REQUEST: u8 = 0b00_0001;
    /// Packet carries stream frames.
    pub const STREAM_DATA: u8 = 0b00_0010;
    /// `packet_number` acknowledges a packet previously sent by the peer.
    pub const ACK: u8 = 0b00_0100;
    /// Handshake: connection id request (cid 0) or assignment (cid != 0).
    pub const START_CONNECTION: u8 = 0b00_1000;
    /// Sender wants to close the connection.
    pub const FIN: u8 = 0b01_0000;
    /// Acknowledges a FIN.
    pub const FIN_ACK: u8 = 0b10_0000;
}

/// Bit-flag constants for the frame-level `flags` field.
pub mod frame_flags {
    /// Regular data frame.
    pub const DATA: u8 = 0b01;
    /// Last frame of its stream.
    pub const FIN_DATA: u8 = 0b10;
}

/// Byte length of the fixed packet header.
/// flags(1) + connection_id(8) + packet_number(4)
pub const PACKET_HEADER_LEN: usize = 13;

/// Byte length of the fixed frame header.
/// flags(1) + stream_id(8) + offset(4) + length(4)
pub const FRAME_HEADER_LEN: usize = 17;

/// Largest datagram either side will send or receive.
pub const MAX_DATAGRAM: usize = 65_535;

const OFF_FLAGS: usize = 0;
const OFF_ID: usize = 1;
const OFF_PN: usize = 9;
const OFF_FRAME_OFFSET: usize = 9;
const OFF_FRAME_LEN: usize = 13;

/// Errors that can arise while encoding or decoding a datagram.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
    /// A frame header or payload extends past the end of the buffer.
    #[error("malformed frame: needs {needed} bytes, only {available} available")]
    MalformedFrame { needed: usize, available: usize },
    /// The packet header is truncated or a trailing frame is cut short.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    /// The encoded packet would not fit in a single datagram.
    #[error("packet of {size} bytes exceeds the {max}-byte datagram limit")]
    Oversized { size: usize, max: usize },
}

/// One chunk of stream data.
///
/// `offset` is informational: it records how many bytes the sender had
/// already put on this stream.  Receivers append payloads in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: u64,
    pub offset: u32,
    pub payload: Vec<u8>,
    /// Set on the last frame of the stream.
    pub fin: bool,
}

impl Frame {
    /// Number of payload bytes, as written into the `length` field.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Size of this frame on the wire.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    fn flags(&self) -> u8 {
        if self.fin {
            frame_flags::DATA | frame_flags::FIN_DATA
        } else {
            frame_flags::DATA
        }
    }

    /// Append the wire form of this frame to `buf`.
    ///
    /// Fails with [`PacketError::Oversized`] if the payload length does not
    /// fit the 32-bit `length` field; nothing is written in that case.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), PacketError> {
        let length = u32::try_from(self.payload.len()).map_err(|_| PacketError::Oversized {
            size: self.payload.len(),
            max: u32::MAX as usize,
        })?;
        buf.push(self.flags());
        buf.extend_from_slice(&self.stream_id.to_be_bytes());
        buf.extend_from_slice(&self.offset.to_be_bytes());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Serialise this frame into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns the frame together with the number of bytes it occupied, so
    /// the caller can continue with the remainder.  Never reads past the end
    /// of `buf`: a declared `length` larger than what remains yields
    /// [`PacketError::MalformedFrame`].
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(PacketError::MalformedFrame {
                needed: FRAME_HEADER_LEN,
                available: buf.len(),
            });
        }

        let flags = buf[OFF_FLAGS];
        let stream_id = read_u64(buf, OFF_ID);
        let offset = read_u32(buf, OFF_FRAME_OFFSET);
        let length = read_u32(buf, OFF_FRAME_LEN) as usize;

        let rest = &buf[FRAME_HEADER_LEN..];
        if rest.len() < length {
            return Err(PacketError::MalformedFrame {
                needed: length,
                available: rest.len(),
            });
        }

        let frame = Frame {
            stream_id,
            offset,
            payload: rest[..length].to_vec(),
            fin: flags & frame_flags::FIN_DATA != 0,
        };
        Ok((frame, FRAME_HEADER_LEN + length))
    }
}

/// A complete protocol datagram: header + frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    pub connection_id: u64,
    pub packet_number: u32,
    /// Empty for control packets.
    pub frames: Vec<Frame>,
}

impl Packet {
    /// A frameless control packet (handshake, ACK, FIN, FIN_ACK).
    pub fn control(flags: u8, connection_id: u64, packet_number: u32) -> Self {
        Self {
            flags,
            connection_id,
            packet_number,
            frames: Vec::new(),
        }
    }

    /// `true` when every bit of `flag` is set on this packet.
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }

    /// Size of this packet on the wire.
    pub fn encoded_len(&self) -> usize {
        PACKET_HEADER_LEN + self.frames.iter().map(Frame::encoded_len).sum::<usize>()
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Fails with [`PacketError::Oversized`] when the result would exceed
    /// [`MAX_DATAGRAM`]; datagrams are never fragmented.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let size = self.encoded_len();
        if size > MAX_DATAGRAM {
            return Err(PacketError::Oversized {
                size,
                max: MAX_DATAGRAM,
            });
        }

        let mut buf = Vec::with_capacity(size);
        buf.push(self.flags);
        buf.extend_from_slice(&self.connection_id.to_be_bytes());
        buf.extend_from_slice(&self.packet_number.to_be_bytes());
        for frame in &self.frames {
            frame.encode_into(&mut buf)?;
        }
        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Frames are decoded back to back until the buffer is exhausted.
    /// Returns [`PacketError::MalformedPacket`] if the header is short or the
    /// trailing frame is truncated.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < PACKET_HEADER_LEN {
            return Err(PacketError::MalformedPacket(format!(
                "{} bytes is shorter than the {PACKET_HEADER_LEN}-byte header",
                buf.len()
            )));
        }

        let flags = buf[OFF_FLAGS];
        let connection_id = read_u64(buf, OFF_ID);
        let packet_number = read_u32(buf, OFF_PN);

        let mut rest = &buf[PACKET_HEADER_LEN..];
        let mut frames = Vec::new();
        while !rest.is_empty() {
            let (frame, used) = Frame::decode(rest).map_err(|e| {
                PacketError::MalformedPacket(format!("frame {}: {e}", frames.len()))
            })?;
            frames.push(frame);
            rest = &rest[used..];
        }

        Ok(Packet {
            flags,
            connection_id,
            packet_number,
            frames,
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(bytes)
}
