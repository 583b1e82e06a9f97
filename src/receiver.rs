//! Receive-side state machine.
//!
//! [`ReceiverEngine`] validates inbound datagrams, buffers out-of-order DATA
//! inside the receive window, delivers the contiguous prefix, and decides
//! which cumulative ACK (if any) to send back.
//!
//! - Only sequences in `[expected, expected + window_size)` are buffered.
//! - After every in-window or already-delivered DATA packet the engine
//!   answers with ACK(`expected`), even when nothing advanced.  The sender
//!   relies on this to notice a stall and go back N.
//! - Corrupt, malformed, and out-of-order-protocol packets produce no reply,
//!   exactly as if the network had lost them.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility (see [`crate::connection::receive_message`]).

use std::collections::HashMap;

use crate::packet::{Packet, PacketType};
use crate::state::ReceiverState;

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct ReceiverEngine {
    state: ReceiverState,

    /// Next contiguous sequence number not yet delivered.
    expected_seq: u32,

    window_size: usize,

    /// Out-of-order payloads keyed by sequence number.
    reorder_buffer: HashMap<u32, Vec<u8>>,

    /// In-order payloads, one entry per delivered DATA packet.
    delivered: Vec<Vec<u8>>,

    /// Highest ACK value handed out so far.
    last_ack: Option<u32>,
}

impl ReceiverEngine {
    /// Create an engine awaiting START.
    ///
    /// # Panics
    ///
    /// If `window_size` is 0.  [`Config::validate`](crate::Config::validate)
    /// rejects that before any connection builds an engine.
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            state: ReceiverState::AwaitingStart,
            expected_seq: 0,
            window_size,
            reorder_buffer: HashMap::new(),
            delivered: Vec::new(),
            last_ack: None,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ReceiverState::Closed
    }

    /// Cumulative acknowledgement point (`expected_sequence`).
    pub fn expected_sequence(&self) -> u32 {
        self.expected_seq
    }

    /// Number of out-of-order payloads currently buffered.
    pub fn buffered(&self) -> usize {
        self.reorder_buffer.len()
    }

    /// Payloads delivered so far, in sequence order.
    pub fn delivered(&self) -> &[Vec<u8>] {
        &self.delivered
    }

    /// Concatenate every delivered payload into the reassembled message.
    pub fn into_message(self) -> Vec<u8> {
        self.delivered.concat()
    }

    /// Validate a raw datagram and feed it to [`on_packet`](Self::on_packet).
    ///
    /// Datagrams that fail to decode or verify are dropped with no reply.
    pub fn on_datagram(&mut self, bytes: &[u8]) -> Option<Packet> {
        match Packet::parse(bytes) {
            Ok(pkt) => self.on_packet(&pkt),
            Err(e) => {
                log::debug!("[receiver] dropping datagram: {e}");
                None
            }
        }
    }

    /// Apply one verified packet.  Returns the ACK to send to its source,
    /// or `None` when the packet must be ignored.
    pub fn on_packet(&mut self, pkt: &Packet) -> Option<Packet> {
        match (self.state, pkt.kind) {
            (ReceiverState::AwaitingStart, PacketType::Start) => {
                self.state = ReceiverState::Established;
                self.expected_seq = 1;
                log::debug!("[receiver] ← START; established");
                Some(self.ack(self.expected_seq))
            }
            (ReceiverState::Established, PacketType::Start) => {
                // Our first ACK was lost; repeat the current cumulative point.
                log::debug!("[receiver] ← duplicate START");
                Some(self.ack(self.expected_seq))
            }
            (ReceiverState::Established, PacketType::Data) => self.on_data(pkt.seq, &pkt.payload),
            (ReceiverState::Established, PacketType::End) => {
                if !self.reorder_buffer.is_empty() {
                    log::debug!(
                        "[receiver] discarding {} non-contiguous payload(s) at END",
                        self.reorder_buffer.len()
                    );
                    self.reorder_buffer.clear();
                }
                self.state = ReceiverState::Closed;
                log::debug!("[receiver] ← END seq={}; closed", pkt.seq);
                Some(self.ack(pkt.seq.wrapping_add(1)))
            }
            (ReceiverState::Closed, PacketType::End) => {
                // The final ACK was lost; answer again without touching output.
                Some(self.ack(pkt.seq.wrapping_add(1)))
            }
            (state, kind) => {
                log::trace!("[receiver] ignoring {kind} seq={} in {state}", pkt.seq);
                None
            }
        }
    }

    fn on_data(&mut self, seq: u32, payload: &[u8]) -> Option<Packet> {
        if seq < self.expected_seq {
            log::trace!("[receiver] ← DATA seq={seq} already delivered");
            return Some(self.ack(self.expected_seq));
        }
        let window_end = u64::from(self.expected_seq) + self.window_size as u64;
        if u64::from(seq) >= window_end {
            log::debug!(
                "[receiver] ← DATA seq={seq} outside window [{}, {window_end}); dropped",
                self.expected_seq
            );
            return None;
        }

        self.reorder_buffer.insert(seq, payload.to_vec());
        while let Some(chunk) = self.reorder_buffer.remove(&self.expected_seq) {
            self.delivered.push(chunk);
            self.expected_seq += 1;
        }
        log::debug!(
            "[receiver] ← DATA seq={seq} len={}; → ACK {} (buffered={})",
            payload.len(),
            self.expected_seq,
            self.reorder_buffer.len()
        );
        Some(self.ack(self.expected_seq))
    }

    /// Build an ACK, never going below an ACK already handed out.
    fn ack(&mut self, value: u32) -> Packet {
        let value = self.last_ack.map_or(value, |last| last.max(value));
        self.last_ack = Some(value);
        Packet::ack(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn established(window: usize) -> ReceiverEngine {
        let mut r = ReceiverEngine::new(window);
        assert_eq!(r.on_packet(&Packet::start()), Some(Packet::ack(1)));
        r
    }

    fn data(seq: u32, byte: u8) -> Packet {
        Packet::data(seq, vec![byte])
    }

    #[test]
    fn initial_state() {
        let r = ReceiverEngine::new(4);
        assert_eq!(r.state(), ReceiverState::AwaitingStart);
        assert_eq!(r.buffered(), 0);
        assert!(r.delivered().is_empty());
    }

    #[test]
    fn start_establishes_and_acks_one() {
        let r = established(4);
        assert_eq!(r.state(), ReceiverState::Established);
        assert_eq!(r.expected_sequence(), 1);
    }

    #[test]
    fn data_before_start_is_dropped() {
        let mut r = ReceiverEngine::new(4);
        assert_eq!(r.on_packet(&data(1, b'A')), None);
        assert_eq!(r.on_packet(&Packet::end(2)), None);
        assert_eq!(r.state(), ReceiverState::AwaitingStart);
        assert!(r.delivered().is_empty());
    }

    #[test]
    fn repeated_start_does_not_reset() {
        let mut r = established(4);
        r.on_packet(&data(1, b'A'));
        r.on_packet(&data(3, b'C'));

        assert_eq!(r.on_packet(&Packet::start()), Some(Packet::ack(2)));
        assert_eq!(r.expected_sequence(), 2);
        assert_eq!(r.buffered(), 1);
        assert_eq!(r.delivered(), &[b"A".to_vec()]);
    }

    #[test]
    fn in_order_data_advances_and_acks() {
        let mut r = established(4);
        assert_eq!(r.on_packet(&data(1, b'A')), Some(Packet::ack(2)));
        assert_eq!(r.on_packet(&data(2, b'B')), Some(Packet::ack(3)));
        assert_eq!(r.delivered(), &[b"A".to_vec(), b"B".to_vec()]);
    }

    #[test]
    fn reordered_pair_delivers_both_with_single_ack() {
        let mut r = established(4);
        // Gap: re-ACK the unchanged cumulative point.
        assert_eq!(r.on_packet(&data(2, b'B')), Some(Packet::ack(1)));
        assert_eq!(r.buffered(), 1);
        assert!(r.delivered().is_empty());

        assert_eq!(r.on_packet(&data(1, b'A')), Some(Packet::ack(3)));
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.delivered(), &[b"A".to_vec(), b"B".to_vec()]);
    }

    #[test]
    fn duplicate_of_delivered_data_reacks_without_redelivery() {
        let mut r = established(4);
        r.on_packet(&data(1, b'A'));
        assert_eq!(r.on_packet(&data(1, b'A')), Some(Packet::ack(2)));
        assert_eq!(r.delivered().len(), 1);
    }

    #[test]
    fn duplicate_buffered_data_is_overwritten_not_duplicated() {
        let mut r = established(4);
        r.on_packet(&data(3, b'C'));
        r.on_packet(&data(3, b'C'));
        assert_eq!(r.buffered(), 1);
        r.on_packet(&data(1, b'A'));
        r.on_packet(&data(2, b'B'));
        assert_eq!(r.into_message(), b"ABC");
    }

    #[test]
    fn out_of_window_data_dropped_silently() {
        let mut r = established(4);
        // expected = 1, window covers 1..=4.
        assert_eq!(r.on_packet(&data(5, b'E')), None);
        assert_eq!(r.buffered(), 0);
        assert!(r.on_packet(&data(4, b'D')).is_some());
        assert_eq!(r.buffered(), 1);
    }

    #[test]
    fn window_slides_with_expected_sequence() {
        let mut r = established(2);
        assert_eq!(r.on_packet(&data(3, b'C')), None);
        r.on_packet(&data(1, b'A'));
        // expected = 2, window covers 2..=3 now.
        assert_eq!(r.on_packet(&data(3, b'C')), Some(Packet::ack(2)));
        assert_eq!(r.buffered(), 1);
    }

    #[test]
    fn end_acks_next_sequence_and_closes() {
        let mut r = established(4);
        r.on_packet(&data(1, b'A'));
        assert_eq!(r.on_packet(&Packet::end(2)), Some(Packet::ack(3)));
        assert!(r.is_closed());
        assert_eq!(r.into_message(), b"A");
    }

    #[test]
    fn end_discards_non_contiguous_buffer() {
        let mut r = established(4);
        r.on_packet(&data(1, b'A'));
        r.on_packet(&data(3, b'C'));
        r.on_packet(&Packet::end(4));
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.into_message(), b"A");
    }

    #[test]
    fn repeated_end_after_close_is_idempotent() {
        let mut r = established(4);
        r.on_packet(&data(1, b'A'));
        r.on_packet(&data(2, b'B'));
        for _ in 0..5 {
            assert_eq!(r.on_packet(&Packet::end(3)), Some(Packet::ack(4)));
        }
        // Late DATA after close changes nothing either.
        assert_eq!(r.on_packet(&data(3, b'C')), None);
        assert_eq!(r.into_message(), b"AB");
    }

    #[test]
    fn ack_packets_are_ignored() {
        let mut r = established(4);
        assert_eq!(r.on_packet(&Packet::ack(7)), None);
        assert_eq!(r.expected_sequence(), 1);
    }

    #[test]
    fn corrupt_datagram_is_dropped() {
        let mut r = established(4);
        let mut bytes = data(1, b'A').encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(r.on_datagram(&bytes), None);
        assert_eq!(r.on_datagram(&bytes[..5]), None);
        assert_eq!(r.expected_sequence(), 1);
        assert!(r.delivered().is_empty());
    }

    #[test]
    fn acks_never_decrease() {
        let mut r = established(3);
        let mut last = 1;
        let arrivals = [3u32, 2, 2, 1, 5, 4, 1, 6, 5, 4, 7];
        for seq in arrivals {
            if let Some(ack) = r.on_packet(&data(seq, seq as u8)) {
                assert!(ack.seq >= last, "ack went from {last} to {}", ack.seq);
                last = ack.seq;
            }
            assert!(r.buffered() < 3);
        }
        // A stale END cannot pull the cumulative point backwards.
        let end_ack = r.on_packet(&Packet::end(1)).unwrap();
        assert!(end_ack.seq >= last);
    }

    #[test]
    fn shuffled_duplicated_arrivals_deliver_in_order() {
        let message: Vec<u8> = (b'a'..=b'p').collect();
        let mut r = established(16);
        // Fixed permutation with duplicates, all inside the window.
        let order = [
            5usize, 3, 16, 1, 1, 9, 2, 14, 7, 4, 4, 12, 6, 8, 10, 13, 11, 15, 3, 16,
        ];
        for seq in order {
            r.on_packet(&data(seq as u32, message[seq - 1]));
        }
        assert_eq!(r.expected_sequence(), 17);
        assert_eq!(r.into_message(), message);
    }
}
