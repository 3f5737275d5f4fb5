//! Periodic Sender Report emission plus classification of incoming RTCP
//! (§4.6). Only active once inbound RTP has latched, so no RTCP goes out
//! before the engine has a real peer address to describe.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::rtp::rtcp::{RtcpPacket, SenderReport};

#[derive(Debug, Clone, Copy, Default)]
pub struct RtcpStats {
    pub reports_sent: u64,
    pub reports_received: u64,
}

pub struct RtcpReporter {
    ssrc: u32,
    interval: Duration,
    last_sent: Option<Instant>,
    last_peer_rtcp_seen: Option<Instant>,
    stats: RtcpStats,
}

impl RtcpReporter {
    pub fn new(ssrc: u32, interval: Duration) -> Self {
        Self { ssrc, interval, last_sent: None, last_peer_rtcp_seen: None, stats: RtcpStats::default() }
    }

    /// Sender Reports never go out before inbound RTP has latched onto a
    /// real peer endpoint.
    pub fn due(&self, now: Instant, inbound_latched: bool) -> bool {
        if !inbound_latched {
            return false;
        }
        match self.last_sent {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        }
    }

    pub fn build_sender_report(
        &mut self,
        now: Instant,
        wall_clock: DateTime<Utc>,
        last_outbound_timestamp: u32,
        sender_packet_count: u32,
        sender_octet_count: u32,
    ) -> SenderReport {
        self.last_sent = Some(now);
        self.stats.reports_sent += 1;
        SenderReport::new(self.ssrc, wall_clock, last_outbound_timestamp, sender_packet_count, sender_octet_count)
    }

    /// Parses and classifies one incoming compound RTCP datagram. Returns
    /// the individual packets for callers that want to act on a Goodbye.
    pub fn note_incoming(&mut self, packets: &[RtcpPacket], now: Instant) {
        for packet in packets {
            self.stats.reports_received += 1;
            match packet {
                RtcpPacket::SenderReport(sr) => {
                    self.last_peer_rtcp_seen = Some(now);
                    debug!(ssrc = sr.ssrc, rtp_timestamp = sr.rtp_timestamp, "received peer sender report");
                }
                RtcpPacket::ReceiverReport(rr) => {
                    debug!(ssrc = rr.ssrc, "received peer receiver report");
                }
                RtcpPacket::SourceDescription(_) => {
                    debug!("received peer SDES");
                }
                RtcpPacket::Goodbye(bye) => {
                    debug!(ssrcs = ?bye.ssrcs, reason = ?bye.reason, "received peer BYE");
                }
            }
        }
    }

    pub fn last_peer_rtcp_seen(&self) -> Option<Instant> {
        self.last_peer_rtcp_seen
    }

    pub fn stats(&self) -> RtcpStats {
        self.stats
    }

    pub fn next_deadline(&self, inbound_latched: bool) -> Option<Instant> {
        if !inbound_latched {
            return None;
        }
        Some(self.last_sent.map(|t| t + self.interval).unwrap_or_else(Instant::now))
    }
}
