//! UpstreamAudioQueue → produce (scheduler-driven) → [optional TempoAdjust]
//! → RTP serialize → UDP send → record tee (§4.10).
//!
//! Stateless free functions plus the `OutboundCursor`, the one piece of
//! state this stage owns: the sequence/timestamp/SSRC that must advance
//! strictly per emitted packet regardless of what produced the audio.

use bytes::Bytes;

use crate::codec::CodecDescriptor;
use crate::frame_size::FrameSizeDetector;
use crate::rtp::{RtpHeader, RtpPacket};

/// Outbound RTP sequence/timestamp cursor (§3 "RTP packet" invariants:
/// sequence +1 and timestamp +samples-per-frame per emitted packet, SSRC
/// fixed for session life).
#[derive(Debug, Clone)]
pub struct OutboundCursor {
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
}

impl OutboundCursor {
    pub fn new(initial_sequence: u16, initial_timestamp: u32, ssrc: u32) -> Self {
        Self { sequence: initial_sequence, timestamp: initial_timestamp, ssrc }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Builds and serializes one outbound RTP packet for `payload`,
    /// advancing the cursor by `samples_per_frame` samples and by one
    /// sequence number. Returns the serialized packet.
    pub fn emit(&mut self, codec: &CodecDescriptor, detector: &FrameSizeDetector, payload: Bytes) -> Bytes {
        let samples_per_frame = detector.outbound_samples_per_frame(codec);
        let header = RtpHeader::new(codec.payload_type, self.sequence, self.timestamp, self.ssrc);
        let packet = RtpPacket::new(header, payload);
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples_per_frame);
        packet.to_bytes()
    }
}

/// One produced outbound unit, ready for serialization and recording.
pub struct OutboundFrame {
    pub payload: Bytes,
    pub is_ai_audio: bool,
}

/// The "produce one packet" step (§4.7): pulls a codec-sized chunk from the
/// upstream queue, falling back to codec silence when none is ready.
pub fn produce(queue: &mut crate::upstream_queue::UpstreamAudioQueue, codec: &CodecDescriptor) -> OutboundFrame {
    match queue.pop_frame() {
        Some(payload) => OutboundFrame { payload, is_ai_audio: true },
        None => OutboundFrame { payload: codec.silence_payload(20), is_ai_audio: false },
    }
}
