//! Reorders, deduplicates and times out gaps in an inbound RTP stream,
//! emitting audio (or loss concealment) in strictly increasing sequence
//! order (§4.4).
//!
//! The buffer owns no timer itself: it exposes `next_deadline()` so the
//! caller (the session task) can arm a single `tokio::time::sleep_until`
//! and call `tick()` when it fires, matching the "single timeout handle"
//! requirement without this module depending on an async runtime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::rtp::seq_delta;

#[derive(Debug, Clone)]
pub struct BufferedPacket {
    pub sequence: u16,
    pub arrival: Instant,
    pub timestamp: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// Real audio, in order.
    Frame { sequence: u16, timestamp: u32, payload: Bytes },
    /// A gap that timed out (or was flushed) without its packet arriving;
    /// the caller substitutes a codec-appropriate silence payload.
    Concealed { sequence: u16 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterStats {
    pub received: u64,
    pub reordered: u64,
    pub lost: u64,
    pub duplicate: u64,
    pub current_depth: u32,
    pub max_depth: u32,
}

pub struct JitterBuffer {
    buffer_time: Duration,
    duplicate_window: usize,
    expected_seq: Option<u16>,
    map: HashMap<u16, BufferedPacket>,
    recent_order: VecDeque<u16>,
    recent_set: HashSet<u16>,
    stats: JitterStats,
}

impl JitterBuffer {
    /// `buffer_time_ms` is clamped to the spec's [20, 200] bound.
    pub fn new(buffer_time_ms: u32, duplicate_window: usize) -> Self {
        let clamped = buffer_time_ms.clamp(20, 200);
        Self {
            buffer_time: Duration::from_millis(clamped as u64),
            duplicate_window,
            expected_seq: None,
            map: HashMap::new(),
            recent_order: VecDeque::new(),
            recent_set: HashSet::new(),
            stats: JitterStats::default(),
        }
    }

    pub fn stats(&self) -> JitterStats {
        self.stats
    }

    fn remember(&mut self, seq: u16) {
        self.recent_set.insert(seq);
        self.recent_order.push_back(seq);
        while self.recent_order.len() > self.duplicate_window {
            if let Some(oldest) = self.recent_order.pop_front() {
                self.recent_set.remove(&oldest);
            }
        }
    }

    /// Admits one received packet, applying the fast path / slow path
    /// admission rules and any resulting drain. See module docs for why
    /// the "just inserted" packet in a drain never itself counts as
    /// `reordered` — only packets that were already waiting do.
    pub fn admit(&mut self, packet: BufferedPacket) -> Vec<Emission> {
        self.stats.received += 1;
        let seq = packet.sequence;

        if self.recent_set.contains(&seq) {
            self.stats.duplicate += 1;
            return Vec::new();
        }

        // A packet older than (or equal to) the last sequence already
        // emitted arrived too late: its gap, if any, was already conceded
        // by a prior tick/flush. Buffering it would let the conceal loop
        // in `drain_due` walk the whole sequence space back up to it.
        if let Some(last_emitted) = self.expected_seq {
            if seq_delta(seq, last_emitted) <= 0 {
                return Vec::new();
            }
        }

        self.remember(seq);

        let fast_path = match self.expected_seq {
            None => true,
            Some(exp) => seq == exp.wrapping_add(1) && self.map.is_empty(),
        };

        if fast_path {
            self.expected_seq = Some(seq);
            return vec![Emission::Frame { sequence: seq, timestamp: packet.timestamp, payload: packet.payload }];
        }

        self.map.insert(seq, packet);
        self.stats.current_depth = self.map.len() as u32;
        self.stats.max_depth = self.stats.max_depth.max(self.stats.current_depth);

        let mut emissions = Vec::new();
        let mut drained_is_trigger = true;
        loop {
            let next = match self.expected_seq {
                Some(exp) => exp.wrapping_add(1),
                None => break,
            };
            let Some(p) = self.map.remove(&next) else { break };
            if !(drained_is_trigger && next == seq) {
                self.stats.reordered += 1;
            }
            drained_is_trigger = false;
            self.expected_seq = Some(next);
            emissions.push(Emission::Frame { sequence: next, timestamp: p.timestamp, payload: p.payload });
        }
        self.stats.current_depth = self.map.len() as u32;
        emissions
    }

    /// When the single timeout handle should next fire: the earliest point
    /// at which any buffered entry reaches `buffer_time` age.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.map.values().map(|p| p.arrival + self.buffer_time).min()
    }

    /// Timeout path: concede loss for gaps preceding any entry that has
    /// aged past `buffer_time`, then emit it.
    pub fn tick(&mut self, now: Instant) -> Vec<Emission> {
        let mut due: Vec<u16> = self
            .map
            .iter()
            .filter(|(_, p)| now.duration_since(p.arrival) >= self.buffer_time)
            .map(|(&seq, _)| seq)
            .collect();
        if due.is_empty() {
            return Vec::new();
        }
        let base = self.expected_seq.map(|e| e.wrapping_add(1)).unwrap_or(0);
        due.sort_by_key(|&s| seq_delta(s, base));
        let emissions = self.drain_due(due);
        self.stats.current_depth = self.map.len() as u32;
        emissions
    }

    /// Drains every remaining buffered entry in sequence order, conceding
    /// loss for internal gaps. Called at session stop.
    pub fn flush(&mut self) -> Vec<Emission> {
        let mut seqs: Vec<u16> = self.map.keys().copied().collect();
        let base = self.expected_seq.map(|e| e.wrapping_add(1)).unwrap_or(0);
        seqs.sort_by_key(|&s| seq_delta(s, base));
        let emissions = self.drain_due(seqs);
        self.map.clear();
        self.stats.current_depth = 0;
        emissions
    }

    fn drain_due(&mut self, seqs: Vec<u16>) -> Vec<Emission> {
        let mut emissions = Vec::new();
        for seq in seqs {
            if !self.map.contains_key(&seq) {
                continue;
            }
            let next_expected = self.expected_seq.map(|e| e.wrapping_add(1)).unwrap_or(seq);
            if seq_delta(seq, next_expected) < 0 {
                // Stale relative to the current playout point (shouldn't
                // happen once `admit` rejects these, but never walk the
                // conceal loop backwards past `expected_seq`).
                self.map.remove(&seq);
                continue;
            }
            loop {
                let next = self.expected_seq.map(|e| e.wrapping_add(1)).unwrap_or(seq);
                if next == seq {
                    break;
                }
                emissions.push(Emission::Concealed { sequence: next });
                self.stats.lost += 1;
                self.expected_seq = Some(next);
            }
            if let Some(p) = self.map.remove(&seq) {
                self.expected_seq = Some(seq);
                emissions.push(Emission::Frame { sequence: seq, timestamp: p.timestamp, payload: p.payload });
            }
        }
        emissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(seq: u16, arrival: Instant, payload: &[u8]) -> BufferedPacket {
        BufferedPacket { sequence: seq, arrival, timestamp: seq as u32 * 160, payload: Bytes::copy_from_slice(payload) }
    }

    #[test]
    fn in_order_stream_emits_immediately_once_each() {
        let mut jb = JitterBuffer::new(60, 100);
        let t0 = Instant::now();
        for seq in 100..105u16 {
            let out = jb.admit(pkt(seq, t0, &[seq as u8]));
            assert_eq!(out.len(), 1);
            assert!(matches!(out[0], Emission::Frame { sequence, .. } if sequence == seq));
        }
        let s = jb.stats();
        assert_eq!(s.received, 5);
        assert_eq!(s.reordered, 0);
        assert_eq!(s.lost, 0);
        assert_eq!(s.duplicate, 0);
    }

    #[test]
    fn duplicate_packet_only_emits_once() {
        let mut jb = JitterBuffer::new(60, 100);
        let t0 = Instant::now();
        let first = jb.admit(pkt(200, t0, b"x"));
        assert_eq!(first.len(), 1);
        let dup = jb.admit(pkt(200, t0, b"x"));
        assert!(dup.is_empty());
        assert_eq!(jb.stats().duplicate, 1);
    }

    #[test]
    fn s3_reorder_scenario() {
        // Feed seq 300, 302, 301, 303 within the buffer window.
        let mut jb = JitterBuffer::new(60, 100);
        let t0 = Instant::now();

        let out300 = jb.admit(pkt(300, t0, b"A"));
        assert_eq!(seqs(&out300), vec![300]);

        let out302 = jb.admit(pkt(302, t0, b"C"));
        assert!(out302.is_empty());

        let out301 = jb.admit(pkt(301, t0, b"B"));
        assert_eq!(seqs(&out301), vec![301, 302]);

        let out303 = jb.admit(pkt(303, t0, b"D"));
        assert_eq!(seqs(&out303), vec![303]);

        assert_eq!(jb.stats().reordered, 1);
        assert_eq!(jb.stats().lost, 0);
    }

    #[test]
    fn s2_loss_concealment_scenario() {
        // Feed seq 200, 201, 203, 204 with 20ms spacing; 202 missing.
        // Buffer time 60ms: timeout should concede the gap once 203's age
        // reaches 60ms.
        let mut jb = JitterBuffer::new(60, 100);
        let t0 = Instant::now();

        assert_eq!(seqs(&jb.admit(pkt(200, t0, b"X0"))), vec![200]);
        assert_eq!(seqs(&jb.admit(pkt(201, t0 + Duration::from_millis(20), b"X1"))), vec![201]);
        assert!(jb.admit(pkt(203, t0 + Duration::from_millis(40), b"X2"))[..].is_empty());
        assert!(jb.admit(pkt(204, t0 + Duration::from_millis(60), b"X3"))[..].is_empty());

        // 203 arrived at t=40ms; buffer_time=60ms means it's due at t=100ms.
        let out = jb.tick(t0 + Duration::from_millis(101));
        assert_eq!(
            out,
            vec![
                Emission::Concealed { sequence: 202 },
                Emission::Frame { sequence: 203, timestamp: 203 * 160, payload: Bytes::copy_from_slice(b"X2") },
                Emission::Frame { sequence: 204, timestamp: 204 * 160, payload: Bytes::copy_from_slice(b"X3") },
            ]
        );

        let s = jb.stats();
        assert_eq!(s.received, 4);
        assert_eq!(s.lost, 1);
        assert_eq!(s.reordered, 0);
    }

    #[test]
    fn packet_older_than_last_emitted_is_dropped_not_buffered() {
        // A packet whose gap was already conceded (seq far behind
        // expected) must not be buffered: re-admitting it should neither
        // emit a huge run of concealment nor inflate `lost`.
        let mut jb = JitterBuffer::new(20, 100);
        let t0 = Instant::now();

        assert_eq!(seqs(&jb.admit(pkt(1000, t0, b"a"))), vec![1000]);

        // A packet delivered very late, well outside the duplicate window
        // and behind the last emitted sequence.
        let stale = jb.admit(pkt(500, t0, b"late"));
        assert!(stale.is_empty());
        assert_eq!(jb.stats().lost, 0);

        // The buffer keeps working normally afterwards.
        assert_eq!(seqs(&jb.admit(pkt(1001, t0, b"b"))), vec![1001]);
        assert_eq!(jb.stats().lost, 0);
    }

    #[test]
    fn flush_drains_remaining_with_loss_concealment() {
        let mut jb = JitterBuffer::new(60, 100);
        let t0 = Instant::now();
        jb.admit(pkt(1, t0, b"a"));
        jb.admit(pkt(3, t0, b"c"));
        let out = jb.flush();
        assert_eq!(out, vec![Emission::Concealed { sequence: 2 }, Emission::Frame { sequence: 3, timestamp: 480, payload: Bytes::copy_from_slice(b"c") }]);
        assert_eq!(jb.stats().lost, 1);
    }

    fn seqs(out: &[Emission]) -> Vec<u16> {
        out.iter()
            .map(|e| match e {
                Emission::Frame { sequence, .. } => *sequence,
                Emission::Concealed { sequence } => *sequence,
            })
            .collect()
    }
}
