//! Application-visible events and the queue that carries them.
//!
//! The [`crate::connection::Connection`] appends an [`Event`] for every
//! decoded occurrence the driver may care about.  The driver drains the
//! queue after each `receive_step` (or `send`, which may dispatch inbound
//! datagrams while it waits for an ACK).
//!
//! Each event is handed out exactly once, oldest first.  The queue is
//! unbounded: a driver that never drains it grows memory without limit.

use std::collections::VecDeque;

/// A decoded occurrence surfaced to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A frame's payload arrived on a stream.
    StreamDataReceived {
        stream_id: u64,
        data: Vec<u8>,
        /// `true` on the fin-tagged frame, i.e. exactly once per stream.
        end_of_stream: bool,
    },
    /// The peer asked for `num_streams` streams.
    StreamRequest { num_streams: u32 },
    /// The peer acknowledged one of our data packets.
    AckReceived { packet_number: u32 },
}

/// FIFO of pending [`Event`]s.
#[derive(Debug, Default)]
pub struct EventQueue {
    inner: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.inner.push_back(event);
    }

    /// Remove and return the oldest event.
    pub fn pop(&mut self) -> Option<Event> {
        self.inner.pop_front()
    }

    /// Remove every queued event, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.inner.drain(..)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_come_out_in_arrival_order() {
        let mut q = EventQueue::new();
        q.push(Event::StreamRequest { num_streams: 3 });
        q.push(Event::AckReceived { packet_number: 1 });
        q.push(Event::StreamDataReceived {
            stream_id: 0,
            data: b"a".to_vec(),
            end_of_stream: false,
        });

        assert_eq!(q.pop(), Some(Event::StreamRequest { num_streams: 3 }));
        assert_eq!(q.pop(), Some(Event::AckReceived { packet_number: 1 }));
        assert!(matches!(q.pop(), Some(Event::StreamDataReceived { .. })));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn drain_empties_the_queue_once() {
        let mut q = EventQueue::new();
        for pn in 0..4 {
            q.push(Event::AckReceived { packet_number: pn });
        }

        let drained: Vec<_> = q.drain().collect();
        assert_eq!(drained.len(), 4);
        assert_eq!(drained[0], Event::AckReceived { packet_number: 0 });
        assert_eq!(drained[3], Event::AckReceived { packet_number: 3 });

        assert!(q.is_empty());
        assert_eq!(q.drain().count(), 0);
    }
}
