//! Receive → validate source → RTP parse → FrameSizeDetector → JitterBuffer
//! → fan-out (§4.9). Stateless free functions; the state they operate on
//! (latching endpoint, detector, jitter buffer) lives on `CallSession` so
//! ownership stays with the one task that's allowed to mutate it.

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::codec::CodecDescriptor;
use crate::endpoint::{Endpoint, LatchingEndpoint};
use crate::frame_size::FrameSizeDetector;
use crate::jitter_buffer::{BufferedPacket, Emission, JitterBuffer};
use crate::rtp::RtpPacket;

/// One unit of audio ready to fan out to the recorder and upstream
/// transport: either real decoded payload or a synthesized silence gap.
pub struct InboundFrame {
    pub sequence: u16,
    pub arrival: Instant,
    pub payload: Bytes,
}

/// Processes one UDP datagram through the full inbound chain. Returns the
/// frames ready to fan out (zero, one, or more if a drain emitted a run).
/// Packets from sources the latch rejects, or that fail to parse, are
/// logged and dropped — never surfaced as an error (§7).
pub fn handle_datagram(
    session_id: &str,
    data: &[u8],
    source: Endpoint,
    arrival: Instant,
    latch: &mut LatchingEndpoint,
    detector: &mut FrameSizeDetector,
    jitter: &mut JitterBuffer,
    codec: &CodecDescriptor,
) -> Vec<InboundFrame> {
    if !latch.admit(source) {
        warn!(session_id, ?source, "rejected inbound packet from invalid source");
        return Vec::new();
    }

    let packet = match RtpPacket::from_bytes(data) {
        Ok(p) => p,
        Err(e) => {
            debug!(session_id, error = %e, "dropping unparseable RTP packet");
            return Vec::new();
        }
    };

    detector.observe(packet.header.sequence, packet.header.timestamp, packet.payload.len(), codec);

    let emissions = jitter.admit(BufferedPacket {
        sequence: packet.header.sequence,
        arrival,
        timestamp: packet.header.timestamp,
        payload: packet.payload,
    });

    to_frames(emissions, codec, arrival)
}

/// Converts timed-out or flushed jitter buffer gaps into the same frame
/// type as real audio would produce, using codec silence for the gap.
pub fn timeout_frames(emissions: Vec<Emission>, codec: &CodecDescriptor, now: Instant) -> Vec<InboundFrame> {
    to_frames(emissions, codec, now)
}

fn to_frames(emissions: Vec<Emission>, codec: &CodecDescriptor, arrival: Instant) -> Vec<InboundFrame> {
    emissions
        .into_iter()
        .map(|e| match e {
            Emission::Frame { sequence, payload, .. } => InboundFrame { sequence, arrival, payload },
            Emission::Concealed { sequence } => InboundFrame { sequence, arrival, payload: codec.silence_payload(20) },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::{RtpHeader, RtpPacket};

    fn make_packet(seq: u16, ts: u32, payload: &[u8]) -> Bytes {
        let header = RtpHeader::new(0, seq, ts, 0xABCD);
        RtpPacket::new(header, Bytes::copy_from_slice(payload)).to_bytes()
    }

    #[test]
    fn latched_valid_packet_flows_through_to_a_frame() {
        let codec = CodecDescriptor::pcmu();
        let mut latch = LatchingEndpoint::new(Endpoint::new("10.0.0.1".parse().unwrap(), 20000));
        let mut detector = FrameSizeDetector::new();
        let mut jitter = JitterBuffer::new(60, 100);

        let source = Endpoint::new("10.0.0.9".parse().unwrap(), 33333);
        let raw = make_packet(100, 1000, &[0xFF; 160]);
        let frames = handle_datagram("call-1", &raw, source, Instant::now(), &mut latch, &mut detector, &mut jitter, &codec);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 100);
        assert!(latch.is_latched());
    }

    #[test]
    fn invalid_source_after_latch_produces_no_frames() {
        let codec = CodecDescriptor::pcmu();
        let mut latch = LatchingEndpoint::new(Endpoint::new("10.0.0.1".parse().unwrap(), 20000));
        let mut detector = FrameSizeDetector::new();
        let mut jitter = JitterBuffer::new(60, 100);

        let good = Endpoint::new("10.0.0.9".parse().unwrap(), 33333);
        handle_datagram("call-1", &make_packet(1, 0, &[0; 160]), good, Instant::now(), &mut latch, &mut detector, &mut jitter, &codec);

        let bogus = Endpoint::new("0.0.0.0".parse().unwrap(), 1);
        let frames = handle_datagram("call-1", &make_packet(2, 160, &[0; 160]), bogus, Instant::now(), &mut latch, &mut detector, &mut jitter, &codec);
        assert!(frames.is_empty());
    }

    #[test]
    fn malformed_packet_is_dropped_not_panicked_on() {
        let codec = CodecDescriptor::pcmu();
        let mut latch = LatchingEndpoint::new(Endpoint::new("10.0.0.1".parse().unwrap(), 20000));
        let mut detector = FrameSizeDetector::new();
        let mut jitter = JitterBuffer::new(60, 100);
        let source = Endpoint::new("10.0.0.9".parse().unwrap(), 33333);

        let frames = handle_datagram("call-1", &[0u8; 4], source, Instant::now(), &mut latch, &mut detector, &mut jitter, &codec);
        assert!(frames.is_empty());
    }
}
