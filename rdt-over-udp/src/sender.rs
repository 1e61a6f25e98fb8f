//! Byte-budgeted sliding-window send state.
//!
//! [`SenderWindow`] tracks every unacknowledged DATA segment.  Unlike a
//! segment-count window, admission is limited by the **sum of payload
//! bytes** in flight.
//!
//! # Protocol contract
//!
//! - Data sequence numbers start at 1 and advance by one per segment.
//! - A segment is admitted only if the in-flight bytes plus its size stay
//!   within `capacity_bytes`.
//! - ACKs are **cumulative**: `ack_num = K` confirms every segment with
//!   `seq ≤ K`, and `base_seq` moves to `K + 1`.
//! - On timeout the caller retransmits **every** segment in
//!   `[base_seq, next_seq)` with byte-identical contents.
//!
//! Acknowledged segments are dropped from the table; their retry counts are
//! folded into a running total first so retransmission statistics survive.
//!
//! This module only manages state; all socket I/O is the caller's responsibility.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::packet::{Packet, PacketError};

/// First sequence number used for data.
pub const FIRST_DATA_SEQ: u16 = 1;

/// One transmitted, not yet cumulatively acknowledged, DATA segment.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Encoded-ready packet; retransmissions resend this unchanged.
    pub packet: Packet,
    /// Time of the most recent transmission (for RTT sampling).
    pub sent_at: Instant,
    /// Number of retransmissions (0 after the first send).
    pub retries: u32,
    /// Stream offset of the first payload byte.
    pub start_byte: u64,
    /// Stream offset of the last payload byte (inclusive).
    pub end_byte: u64,
}

impl Segment {
    pub fn seq(&self) -> u16 {
        self.packet.header.seq
    }

    /// Payload size in bytes (`end_byte - start_byte + 1`).
    pub fn len(&self) -> usize {
        (self.end_byte - self.start_byte + 1) as usize
    }
}

/// Result of offering a payload to the window.
#[derive(Debug)]
pub enum Admission {
    /// The payload was placed in the window; send this packet.
    Sent(Packet),
    /// The payload would overflow the byte budget; it is handed back.
    Full(Vec<u8>),
}

/// What a cumulative ACK confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckedSegment {
    pub seq: u16,
    /// Time since the acknowledged segment's most recent transmission.
    pub rtt: Duration,
    pub start_byte: u64,
    pub end_byte: u64,
}

/// Send-side window state for one client.
///
/// ```text
///  base_seq           next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ <── in flight ──▶│ <── not yet sent ──▶
/// ```
#[derive(Debug)]
pub struct SenderWindow {
    /// Oldest unacknowledged sequence number (left window edge).
    pub base_seq: u16,

    /// Sequence number for the next new segment.
    pub next_seq: u16,

    capacity_bytes: usize,

    /// Segments in `[base_seq, next_seq)`, keyed by sequence number.
    segments: BTreeMap<u16, Segment>,

    /// Running stream offset for the next payload byte.
    byte_offset: u64,

    /// Retries accumulated by segments already acknowledged and dropped.
    retired_retries: u64,
}

impl SenderWindow {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            base_seq: FIRST_DATA_SEQ,
            next_seq: FIRST_DATA_SEQ,
            capacity_bytes,
            segments: BTreeMap::new(),
            byte_offset: 0,
            retired_retries: 0,
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Payload bytes currently unacknowledged.
    pub fn in_flight_bytes(&self) -> usize {
        self.segments
            .range(self.base_seq..self.next_seq)
            .map(|(_, s)| s.len())
            .sum()
    }

    /// `true` while the in-flight bytes are below the budget.
    pub fn has_room(&self) -> bool {
        self.in_flight_bytes() < self.capacity_bytes
    }

    pub fn has_unacked(&self) -> bool {
        self.base_seq < self.next_seq
    }

    pub fn segment(&self, seq: u16) -> Option<&Segment> {
        self.segments.get(&seq)
    }

    /// Try to place `payload` into the window as segment `next_seq`.
    ///
    /// On success the segment is recorded with `sent_at = now` and the caller
    /// must transmit the returned packet.  A payload that would push the
    /// in-flight total past the budget comes back as [`Admission::Full`].
    /// Empty payloads are rejected as [`Admission::Full`] too since they
    /// have no byte range.
    pub fn admit(&mut self, payload: Vec<u8>, now: Instant) -> Result<Admission, PacketError> {
        if payload.is_empty()
            || self.next_seq == u16::MAX
            || self.in_flight_bytes() + payload.len() > self.capacity_bytes
        {
            return Ok(Admission::Full(payload));
        }

        let len = payload.len() as u64;
        let packet = Packet::data(self.next_seq, payload)?;
        let segment = Segment {
            packet: packet.clone(),
            sent_at: now,
            retries: 0,
            start_byte: self.byte_offset,
            end_byte: self.byte_offset + len - 1,
        };
        self.segments.insert(self.next_seq, segment);
        self.byte_offset += len;
        self.next_seq += 1;
        Ok(Admission::Sent(packet))
    }

    /// Process a cumulative ACK.
    ///
    /// ACKs below `base_seq` (stale or duplicate) and at or beyond `next_seq`
    /// (never sent) return `None` and change nothing.  Otherwise the RTT is
    /// measured against segment `ack_num`'s latest transmission, every segment
    /// up to and including `ack_num` is retired, and `base_seq` becomes
    /// `ack_num + 1`.
    pub fn on_ack(&mut self, ack_num: u16, now: Instant) -> Option<AckedSegment> {
        if ack_num < self.base_seq || ack_num >= self.next_seq {
            return None;
        }

        let acked = self.segments.get(&ack_num).map(|s| AckedSegment {
            seq: ack_num,
            rtt: now.saturating_duration_since(s.sent_at),
            start_byte: s.start_byte,
            end_byte: s.end_byte,
        })?;

        let remaining = self.segments.split_off(&(ack_num + 1));
        let retired = std::mem::replace(&mut self.segments, remaining);
        self.retired_retries += retired.values().map(|s| u64::from(s.retries)).sum::<u64>();
        self.base_seq = ack_num + 1;

        Some(acked)
    }

    /// Refresh `sent_at` and bump `retries` for every in-flight segment,
    /// returning the packets to resend, oldest first.
    pub fn retransmit_all(&mut self, now: Instant) -> Vec<Packet> {
        self.segments
            .range_mut(self.base_seq..self.next_seq)
            .map(|(_, s)| {
                s.sent_at = now;
                s.retries += 1;
                s.packet.clone()
            })
            .collect()
    }

    /// Iterate over in-flight segments from oldest to newest.
    pub fn in_flight_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.range(self.base_seq..self.next_seq).map(|(_, s)| s)
    }

    /// Retransmissions across every segment ever admitted.
    pub fn total_retransmissions(&self) -> u64 {
        self.retired_retries
            + self
                .segments
                .values()
                .map(|s| u64::from(s.retries))
                .sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(window: &mut SenderWindow, len: usize, now: Instant) -> Packet {
        match window.admit(vec![len as u8; len], now).unwrap() {
            Admission::Sent(p) => p,
            Admission::Full(_) => panic!("window unexpectedly full"),
        }
    }

    #[test]
    fn initial_state() {
        let w = SenderWindow::new(400);
        assert_eq!(w.base_seq, 1);
        assert_eq!(w.next_seq, 1);
        assert_eq!(w.in_flight_bytes(), 0);
        assert!(w.has_room());
        assert!(!w.has_unacked());
    }

    #[test]
    fn admit_assigns_sequence_and_byte_range() {
        let mut w = SenderWindow::new(400);
        let now = Instant::now();
        let p1 = sent(&mut w, 50, now);
        let p2 = sent(&mut w, 60, now);

        assert_eq!(p1.header.seq, 1);
        assert_eq!(p2.header.seq, 2);
        assert_eq!(w.next_seq, 3);
        assert_eq!(w.in_flight_bytes(), 110);

        let s2 = w.segment(2).unwrap();
        assert_eq!((s2.start_byte, s2.end_byte), (50, 109));
        assert_eq!(s2.len(), 60);
    }

    #[test]
    fn admission_respects_byte_budget() {
        let mut w = SenderWindow::new(150);
        let now = Instant::now();
        sent(&mut w, 80, now);
        sent(&mut w, 70, now);
        assert_eq!(w.in_flight_bytes(), 150);
        assert!(!w.has_room());

        match w.admit(vec![0u8; 1], now).unwrap() {
            Admission::Full(p) => assert_eq!(p.len(), 1),
            Admission::Sent(_) => panic!("budget exceeded"),
        }
        assert_eq!(w.next_seq, 3);
    }

    #[test]
    fn oversize_payload_handed_back_intact() {
        let mut w = SenderWindow::new(100);
        let now = Instant::now();
        sent(&mut w, 60, now);
        match w.admit(vec![7u8; 50], now).unwrap() {
            Admission::Full(p) => assert_eq!(p, vec![7u8; 50]),
            Admission::Sent(_) => panic!("budget exceeded"),
        }
    }

    #[test]
    fn cumulative_ack_confirms_lower_segments() {
        let mut w = SenderWindow::new(400);
        let now = Instant::now();
        for len in [50, 60, 70] {
            sent(&mut w, len, now);
        }

        // ACKs for 1 and 2 were lost; ACK 3 covers everything.
        let acked = w.on_ack(3, now).unwrap();
        assert_eq!(acked.seq, 3);
        assert_eq!((acked.start_byte, acked.end_byte), (110, 179));
        assert_eq!(w.base_seq, 4);
        assert!(!w.has_unacked());
        assert_eq!(w.in_flight_bytes(), 0);
        assert!(w.segment(1).is_none());
    }

    #[test]
    fn stale_and_future_acks_are_ignored() {
        let mut w = SenderWindow::new(400);
        let now = Instant::now();
        sent(&mut w, 50, now);
        sent(&mut w, 50, now);

        assert!(w.on_ack(1, now).is_some());
        assert!(w.on_ack(1, now).is_none(), "duplicate ACK");
        assert!(w.on_ack(0, now).is_none(), "ACK of nothing");
        assert!(w.on_ack(9, now).is_none(), "ACK beyond next_seq");
        assert_eq!(w.base_seq, 2);
    }

    #[test]
    fn base_never_passes_next() {
        let mut w = SenderWindow::new(400);
        let now = Instant::now();
        sent(&mut w, 40, now);
        w.on_ack(1, now);
        assert_eq!(w.base_seq, w.next_seq);
        assert!(w.on_ack(1, now).is_none());
        assert!(w.on_ack(2, now).is_none());
        assert!(w.base_seq <= w.next_seq);
    }

    #[test]
    fn retransmit_resends_identical_packets() {
        let mut w = SenderWindow::new(400);
        let now = Instant::now();
        let originals: Vec<Packet> = [45, 55].iter().map(|&l| sent(&mut w, l, now)).collect();

        let resent = w.retransmit_all(now + Duration::from_millis(300));
        assert_eq!(resent, originals);
        assert_eq!(w.base_seq, 1);
        assert_eq!(w.next_seq, 3);
        assert!(w.in_flight_segments().all(|s| s.retries == 1));
    }

    #[test]
    fn rtt_measured_from_latest_transmission() {
        let mut w = SenderWindow::new(400);
        let t0 = Instant::now();
        sent(&mut w, 50, t0);

        let t1 = t0 + Duration::from_millis(300);
        w.retransmit_all(t1);

        let acked = w.on_ack(1, t1 + Duration::from_millis(20)).unwrap();
        assert_eq!(acked.rtt, Duration::from_millis(20));
    }

    #[test]
    fn retries_survive_retirement() {
        let mut w = SenderWindow::new(400);
        let now = Instant::now();
        sent(&mut w, 50, now);
        sent(&mut w, 50, now);
        w.retransmit_all(now);
        w.retransmit_all(now);
        assert_eq!(w.total_retransmissions(), 4);

        w.on_ack(2, now);
        assert_eq!(w.total_retransmissions(), 4);
        assert!(w.retransmit_all(now).is_empty());
    }
}
