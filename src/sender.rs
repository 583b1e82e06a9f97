//! Go-Back-N send-side window over a chunked message.
//!
//! [`SenderWindow`] owns the message split into chunks and tracks which of
//! them are acknowledged, in flight, or not yet sent.
//!
//! # Protocol contract
//!
//! - Chunk `i` travels as DATA with sequence number `i + 1`; START is 0 and
//!   END is `chunks + 1`.
//! - At most `window_size` chunks are in flight at once.
//! - ACKs are **cumulative**: ACK `A` confirms every sequence below `A`, so
//!   the window jumps straight to the chunk carrying sequence `A`.
//! - On timeout, the caller retransmits **all** in-flight chunks (go back N).
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use crate::packet::Packet;

/// Split `message` into consecutive chunks of at most `max_payload` bytes.
///
/// An empty message yields no chunks.
///
/// # Panics
///
/// If `max_payload` is 0.
pub fn split_message(message: &[u8], max_payload: usize) -> Vec<Vec<u8>> {
    assert!(max_payload >= 1, "max_payload must be at least 1");
    message.chunks(max_payload).map(<[u8]>::to_vec).collect()
}

/// Send-side window state for one transfer.
///
/// # Index layout
///
/// ```text
///  window_start      sent_end        window_end
///      │                 │               │
///  ────┼─────────────────┼───────────────┼──────────▶ chunk index
///  acked │ <─ in flight ─▶│ <─ sendable ─▶│  blocked
/// ```
#[derive(Debug)]
pub struct SenderWindow {
    chunks: Vec<Vec<u8>>,

    /// Index of the oldest unacknowledged chunk (left window edge).
    window_start: usize,

    /// One past the highest chunk transmitted at least once.
    sent_end: usize,

    /// Maximum number of chunks in flight simultaneously (N).
    window_size: usize,
}

impl SenderWindow {
    /// Create a window over pre-split `chunks`.
    ///
    /// # Panics
    ///
    /// If `window_size` is 0.
    pub fn new(chunks: Vec<Vec<u8>>, window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            chunks,
            window_start: 0,
            sent_end: 0,
            window_size,
        }
    }

    /// Split `message` and build a window over it.
    pub fn for_message(message: &[u8], max_payload: usize, window_size: usize) -> Self {
        Self::new(split_message(message, max_payload), window_size)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn window_start(&self) -> usize {
        self.window_start
    }

    /// Exclusive right edge: `min(window_start + window_size, chunks)`.
    pub fn window_end(&self) -> usize {
        (self.window_start + self.window_size).min(self.chunks.len())
    }

    /// Sequence number carried by the chunk at `window_start`.
    ///
    /// Once every chunk is acknowledged this is the END sequence number.
    pub fn next_sequence(&self) -> u32 {
        seq_of(self.window_start)
    }

    /// Sequence number the END packet must carry.
    pub fn end_sequence(&self) -> u32 {
        seq_of(self.chunks.len())
    }

    /// Number of chunks sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.sent_end - self.window_start
    }

    /// `true` once every chunk has been cumulatively acknowledged.
    pub fn is_complete(&self) -> bool {
        self.window_start == self.chunks.len()
    }

    /// Packets for every chunk in the window that has never been sent.
    ///
    /// Marks them as in flight; the caller must transmit all of them.
    pub fn take_unsent(&mut self) -> Vec<Packet> {
        let end = self.window_end();
        let start = self.sent_end.max(self.window_start);
        let pkts = self.packets(start, end);
        self.sent_end = self.sent_end.max(end);
        pkts
    }

    /// Packets for every in-flight chunk, oldest first.
    ///
    /// Used on timeout to retransmit the whole window (the "go back N" step).
    pub fn in_flight_packets(&self) -> Vec<Packet> {
        self.packets(self.window_start, self.sent_end)
    }

    /// Process a cumulative ACK.
    ///
    /// Slides `window_start` to the chunk carrying sequence `ack` and returns
    /// the number of newly acknowledged chunks.  Returns `0` for a stale or
    /// duplicate ACK, and for an ACK covering chunks never sent.
    pub fn on_ack(&mut self, ack: u32) -> usize {
        // ACK 0 would acknowledge nothing, not even START.
        let Some(acked_upto) = (ack as usize).checked_sub(1) else {
            return 0;
        };
        if acked_upto <= self.window_start || acked_upto > self.sent_end {
            return 0;
        }
        let newly = acked_upto - self.window_start;
        self.window_start = acked_upto;
        newly
    }

    fn packets(&self, start: usize, end: usize) -> Vec<Packet> {
        if start >= end {
            return Vec::new();
        }
        self.chunks[start..end]
            .iter()
            .enumerate()
            .map(|(offset, chunk)| Packet::data(seq_of(start + offset), chunk.clone()))
            .collect()
    }
}

#[inline]
fn seq_of(index: usize) -> u32 {
    index as u32 + 1
}
