//! Per-stream send and receive state.
//!
//! A [`Stream`] pairs a [`StreamSender`] (offset counter) with a
//! [`StreamReceiver`] (append-only buffer).  Neither touches the socket;
//! [`crate::connection::Connection`] calls these methods and owns the
//! actual send/receive loop.
//!
//! [`StreamTable`] holds every stream of one connection together with the
//! set of closed ids and the frames queued for the next packet.
//!
//! # Contract
//! - No retransmission buffer is kept: a frame is built, queued, forgotten.
//! - Receivers append payloads in **arrival** order; `offset` is not used
//!   to reorder, so out-of-order delivery corrupts the buffer.
//! - `closed` only ever goes from `false` to `true`.

use std::collections::{HashMap, HashSet};

use crate::error::ConnError;
use crate::event::Event;
use crate::packet::Frame;

/// Numerator/denominator of the batching ratio: a packet is flushed once
/// queued frames reach `ceil(3/5 × open streams)`.
const BATCH_NUM: usize = 3;
const BATCH_DEN: usize = 5;

/// Number of queued frames that triggers a flush when `open` streams are open.
pub fn flush_threshold(open: usize) -> usize {
    (open * BATCH_NUM).div_ceil(BATCH_DEN)
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Send-side state for one stream.
#[derive(Debug)]
pub struct StreamSender {
    stream_id: u64,
    /// Bytes handed out so far; the offset of the next frame.
    offset: u32,
}

impl StreamSender {
    pub fn new(stream_id: u64) -> Self {
        Self {
            stream_id,
            offset: 0,
        }
    }

    /// Build the next frame for `payload` and advance the offset past it.
    pub fn send_data(&mut self, payload: Vec<u8>, end_of_stream: bool) -> Frame {
        let frame = Frame {
            stream_id: self.stream_id,
            offset: self.offset,
            fin: end_of_stream,
            payload,
        };
        self.offset = self.offset.wrapping_add(frame.len() as u32);
        frame
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Receive-side state for one stream.
#[derive(Debug)]
pub struct StreamReceiver {
    stream_id: u64,
    /// Every payload received so far, concatenated in arrival order.
    buffer: Vec<u8>,
}

impl StreamReceiver {
    pub fn new(stream_id: u64) -> Self {
        Self {
            stream_id,
            buffer: Vec::new(),
        }
    }

    /// Append `frame`'s payload and describe it as an event.
    pub fn receive(&mut self, frame: Frame) -> Event {
        self.buffer.extend_from_slice(&frame.payload);
        Event::StreamDataReceived {
            stream_id: self.stream_id,
            data: frame.payload,
            end_of_stream: frame.fin,
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Stream {
    pub id: u64,
    pub sender: StreamSender,
    pub receiver: StreamReceiver,
    closed: bool,
}

impl Stream {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            sender: StreamSender::new(id),
            receiver: StreamReceiver::new(id),
            closed: false,
        }
    }

    /// Feed an inbound frame to the receiver; a fin frame closes the stream.
    pub fn receive(&mut self, frame: Frame) -> Event {
        let fin = frame.fin;
        let event = self.receiver.receive(frame);
        if fin {
            self.closed = true;
        }
        event
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes received on this stream so far.
    pub fn received(&self) -> &[u8] {
        self.receiver.buffer()
    }
}

// ---------------------------------------------------------------------------
// StreamTable
// ---------------------------------------------------------------------------

/// All streams of one connection, plus the outbound frame batch.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: HashMap<u64, Stream>,
    closed: HashSet<u64>,
    /// Frames waiting to be packed into the next data packet.
    queued: Vec<Frame>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stream with `id`, creating it if it does not exist yet.
    pub fn open(&mut self, id: u64) -> &mut Stream {
        self.streams.entry(id).or_insert_with(|| Stream::new(id))
    }

    pub fn get(&self, id: u64) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn is_closed(&self, id: u64) -> bool {
        self.closed.contains(&id)
    }

    /// Streams known to the table that are not closed yet.
    pub fn open_count(&self) -> usize {
        self.streams.len() - self.closed.len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Build a frame for `data` on stream `id` and queue it.
    ///
    /// Sending with `end_of_stream` closes the stream locally.  Returns
    /// `true` when the batch has reached [`flush_threshold`] and must be
    /// packed and sent now.
    pub fn queue_send(
        &mut self,
        id: u64,
        data: Vec<u8>,
        end_of_stream: bool,
    ) -> Result<bool, ConnError> {
        if self.is_closed(id) {
            return Err(ConnError::StreamClosed(id));
        }

        let stream = self.open(id);
        let frame = stream.sender.send_data(data, end_of_stream);
        if end_of_stream {
            stream.close();
            self.closed.insert(id);
            log::debug!("[stream {id}] finished sending");
        }
        self.queued.push(frame);

        Ok(self.queued.len() >= flush_threshold(self.open_count()))
    }

    /// Take every queued frame, leaving the batch empty.
    pub fn take_batch(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.queued)
    }

    /// Route an inbound frame to its stream's receiver.
    ///
    /// Frames for a closed stream are refused with
    /// [`ConnError::StreamClosed`]; the caller decides whether to log them.
    pub fn deliver(&mut self, frame: Frame) -> Result<Event, ConnError> {
        let id = frame.stream_id;
        if self.is_closed(id) {
            return Err(ConnError::StreamClosed(id));
        }

        let stream = self.open(id);
        let event = stream.receive(frame);
        if stream.is_closed() {
            self.closed.insert(id);
            log::debug!("[stream {id}] received end of data");
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream_id: u64, payload: &[u8], fin: bool) -> Frame {
        Frame {
            stream_id,
            offset: 0,
            payload: payload.to_vec(),
            fin,
        }
    }

    #[test]
    fn sender_offsets_are_cumulative() {
        let mut s = StreamSender::new(9);
        let payloads: [&[u8]; 4] = [b"abc", b"", b"defgh", b"ij"];
        let mut expected = 0u32;
        for p in payloads {
            let f = s.send_data(p.to_vec(), false);
            assert_eq!(f.stream_id, 9);
            assert_eq!(f.offset, expected);
            assert!(!f.fin);
            expected += p.len() as u32;
        }
        assert_eq!(s.offset(), 10);
    }

    #[test]
    fn sender_tags_fin() {
        let mut s = StreamSender::new(0);
        s.send_data(b"body".to_vec(), false);
        let last = s.send_data(b"tail".to_vec(), true);
        assert!(last.fin);
        assert_eq!(last.offset, 4);
    }

    #[test]
    fn receiver_concatenates_in_arrival_order() {
        let mut st = Stream::new(2);
        let chunks: [&[u8]; 3] = [b"one ", b"two ", b"three"];
        let mut fins = 0;
        for (i, c) in chunks.iter().enumerate() {
            let last = i == chunks.len() - 1;
            match st.receive(frame(2, c, last)) {
                Event::StreamDataReceived {
                    stream_id,
                    data,
                    end_of_stream,
                } => {
                    assert_eq!(stream_id, 2);
                    assert_eq!(data, c.to_vec());
                    if end_of_stream {
                        fins += 1;
                    }
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(fins, 1);
        assert_eq!(st.received(), b"one two three");
        assert!(st.is_closed());
    }

    #[test]
    fn stream_closed_only_by_fin() {
        let mut st = Stream::new(0);
        st.receive(frame(0, b"x", false));
        assert!(!st.is_closed());
        st.receive(frame(0, b"y", true));
        assert!(st.is_closed());
    }

    #[test]
    fn threshold_values() {
        assert_eq!(flush_threshold(0), 0);
        assert_eq!(flush_threshold(1), 1);
        assert_eq!(flush_threshold(2), 2);
        assert_eq!(flush_threshold(3), 2);
        assert_eq!(flush_threshold(5), 3);
        assert_eq!(flush_threshold(10), 6);
    }

    #[test]
    fn five_open_streams_flush_on_third_frame() {
        let mut t = StreamTable::new();
        for id in 0..5 {
            t.open(id);
        }

        assert!(!t.queue_send(0, b"a".to_vec(), false).unwrap());
        assert!(!t.queue_send(1, b"b".to_vec(), false).unwrap());
        assert!(t.queue_send(2, b"c".to_vec(), false).unwrap());

        let batch = t.take_batch();
        assert_eq!(batch.len(), 3);
        assert_eq!(t.queued(), 0);
    }

    #[test]
    fn send_on_closed_stream_is_rejected() {
        let mut t = StreamTable::new();
        t.queue_send(4, b"last".to_vec(), true).unwrap();
        assert!(t.is_closed(4));
        assert!(matches!(
            t.queue_send(4, b"more".to_vec(), false),
            Err(ConnError::StreamClosed(4))
        ));
    }

    #[test]
    fn last_open_stream_finishing_flushes() {
        let mut t = StreamTable::new();
        t.open(0);
        t.open(1);
        t.queue_send(0, b"x".to_vec(), true).unwrap();
        t.take_batch();
        // Only stream 1 remains open; its fin frame brings the open count to 0.
        assert!(t.queue_send(1, b"y".to_vec(), true).unwrap());
        assert_eq!(t.open_count(), 0);
        assert_eq!(t.closed_count(), 2);
    }

    #[test]
    fn deliver_skips_closed_streams() {
        let mut t = StreamTable::new();
        t.deliver(frame(1, b"done", true)).unwrap();
        assert!(matches!(
            t.deliver(frame(1, b"late", false)),
            Err(ConnError::StreamClosed(1))
        ));
        assert_eq!(t.get(1).unwrap().received(), b"done");
    }
}
