//! Per-call counters (§3 "SessionStats"): packets/bytes in each direction,
//! first/last packet wall-clock times, and a snapshot of the jitter
//! buffer's own counters. Cheap to clone; `CallSession` holds the live
//! copy and hands out snapshots through `stats()`.

use chrono::{DateTime, Utc};

use crate::jitter_buffer::JitterStats;

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub first_packet_at: Option<DateTime<Utc>>,
    pub last_packet_at: Option<DateTime<Utc>>,
    pub jitter: JitterStats,
}

impl SessionStats {
    pub fn note_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn note_received(&mut self, bytes: usize, now: DateTime<Utc>) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
        if self.first_packet_at.is_none() {
            self.first_packet_at = Some(now);
        }
        self.last_packet_at = Some(now);
    }

    pub fn update_jitter(&mut self, jitter: JitterStats) {
        self.jitter = jitter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_packet_timestamp_is_sticky() {
        let mut stats = SessionStats::default();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::milliseconds(20);
        stats.note_received(160, t0);
        stats.note_received(160, t1);
        assert_eq!(stats.first_packet_at, Some(t0));
        assert_eq!(stats.last_packet_at, Some(t1));
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.bytes_received, 320);
    }

    #[test]
    fn sent_counters_accumulate() {
        let mut stats = SessionStats::default();
        stats.note_sent(160);
        stats.note_sent(160);
        assert_eq!(stats.packets_sent, 2);
        assert_eq!(stats.bytes_sent, 320);
    }
}
