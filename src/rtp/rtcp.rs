//! RTCP (RFC 3550 §6): Sender/Receiver Reports, Source Description, Goodbye.
//! Compound packets (several RTCP packets back to back in one datagram) are
//! iterated in order, matching the wire format carriers actually send.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
pub const NTP_UNIX_EPOCH_OFFSET_SECS: u64 = 2_208_988_800;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtcpError {
    #[error("RTCP header too short: {0} bytes")]
    HeaderTooShort(usize),
    #[error("RTCP packet body too short for declared length")]
    BodyTooShort,
    #[error("unrecognized RTCP packet type: {0}")]
    UnknownPacketType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpPacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
}

impl RtcpPacketType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            200 => Some(Self::SenderReport),
            201 => Some(Self::ReceiverReport),
            202 => Some(Self::SourceDescription),
            203 => Some(Self::Goodbye),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionReport {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_packets_lost: i32,
    pub extended_sequence_number: u32,
    pub jitter: u32,
    pub last_sr_timestamp: u32,
    pub delay_since_last_sr: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_timestamp_msw: u32,
    pub ntp_timestamp_lsw: u32,
    pub rtp_timestamp: u32,
    pub sender_packet_count: u32,
    pub sender_octet_count: u32,
    pub reception_reports: Vec<ReceptionReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reception_reports: Vec<ReceptionReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    pub chunks: Vec<SdesChunk>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub item_type: u8,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goodbye {
    pub ssrcs: Vec<u32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Goodbye(Goodbye),
}

/// Splits the NTP seconds-since-Unix-epoch offset and the 32-bit NTP
/// fractional-seconds field out of a wall-clock `DateTime<Utc>`.
pub fn to_ntp_timestamp(now: DateTime<Utc>) -> (u32, u32) {
    let unix_secs = now.timestamp() as u64;
    let subsec_nanos = now.timestamp_subsec_nanos() as u64;
    let ntp_secs = (unix_secs + NTP_UNIX_EPOCH_OFFSET_SECS) as u32;
    let fraction = ((subsec_nanos << 32) / 1_000_000_000) as u32;
    (ntp_secs, fraction)
}

impl SenderReport {
    pub fn new(
        ssrc: u32,
        now: DateTime<Utc>,
        rtp_timestamp: u32,
        sender_packet_count: u32,
        sender_octet_count: u32,
    ) -> Self {
        let (ntp_timestamp_msw, ntp_timestamp_lsw) = to_ntp_timestamp(now);
        Self {
            ssrc,
            ntp_timestamp_msw,
            ntp_timestamp_lsw,
            rtp_timestamp,
            sender_packet_count,
            sender_octet_count,
            reception_reports: Vec::new(),
        }
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        let header_start = buf.len();
        put_header(&mut buf, RtcpPacketType::SenderReport, self.reception_reports.len() as u8);

        buf.put_u32(self.ssrc);
        buf.put_u32(self.ntp_timestamp_msw);
        buf.put_u32(self.ntp_timestamp_lsw);
        buf.put_u32(self.rtp_timestamp);
        buf.put_u32(self.sender_packet_count);
        buf.put_u32(self.sender_octet_count);
        for r in &self.reception_reports {
            put_reception_report(&mut buf, r);
        }

        finalize_length(&mut buf, header_start);
        buf.freeze()
    }

    fn parse(body: &[u8], count: u8) -> Result<Self, RtcpError> {
        if body.len() < 24 {
            return Err(RtcpError::BodyTooShort);
        }
        let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
        let ntp_timestamp_msw = u32::from_be_bytes(body[4..8].try_into().unwrap());
        let ntp_timestamp_lsw = u32::from_be_bytes(body[8..12].try_into().unwrap());
        let rtp_timestamp = u32::from_be_bytes(body[12..16].try_into().unwrap());
        let sender_packet_count = u32::from_be_bytes(body[16..20].try_into().unwrap());
        let sender_octet_count = u32::from_be_bytes(body[20..24].try_into().unwrap());
        let reception_reports = parse_reception_reports(&body[24..], count)?;
        Ok(Self {
            ssrc,
            ntp_timestamp_msw,
            ntp_timestamp_lsw,
            rtp_timestamp,
            sender_packet_count,
            sender_octet_count,
            reception_reports,
        })
    }
}

impl ReceiverReport {
    fn parse(body: &[u8], count: u8) -> Result<Self, RtcpError> {
        if body.len() < 4 {
            return Err(RtcpError::BodyTooShort);
        }
        let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
        let reception_reports = parse_reception_reports(&body[4..], count)?;
        Ok(Self { ssrc, reception_reports })
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        let header_start = buf.len();
        put_header(&mut buf, RtcpPacketType::ReceiverReport, self.reception_reports.len() as u8);
        buf.put_u32(self.ssrc);
        for r in &self.reception_reports {
            put_reception_report(&mut buf, r);
        }
        finalize_length(&mut buf, header_start);
        buf.freeze()
    }
}

impl SourceDescription {
    fn parse(body: &[u8], count: u8) -> Result<Self, RtcpError> {
        let mut chunks = Vec::new();
        let mut offset = 0;
        for _ in 0..count {
            if body.len() < offset + 4 {
                break;
            }
            let ssrc = u32::from_be_bytes(body[offset..offset + 4].try_into().unwrap());
            offset += 4;
            let mut items = Vec::new();
            loop {
                if offset >= body.len() {
                    break;
                }
                let item_type = body[offset];
                if item_type == 0 {
                    offset += 1;
                    break;
                }
                if offset + 1 >= body.len() {
                    break;
                }
                let len = body[offset + 1] as usize;
                let start = offset + 2;
                let end = (start + len).min(body.len());
                let value = String::from_utf8_lossy(&body[start..end]).into_owned();
                items.push(SdesItem { item_type, value });
                offset = end;
            }
            // Chunks are padded to a 32-bit boundary.
            offset = (offset + 3) & !3;
            chunks.push(SdesChunk { ssrc, items });
        }
        Ok(Self { chunks })
    }
}

impl Goodbye {
    fn parse(body: &[u8], count: u8) -> Result<Self, RtcpError> {
        let mut ssrcs = Vec::new();
        let mut offset = 0;
        for _ in 0..count {
            if body.len() < offset + 4 {
                break;
            }
            ssrcs.push(u32::from_be_bytes(body[offset..offset + 4].try_into().unwrap()));
            offset += 4;
        }
        let reason = if offset < body.len() {
            let len = body[offset] as usize;
            let start = offset + 1;
            let end = (start + len).min(body.len());
            Some(String::from_utf8_lossy(&body[start..end]).into_owned())
        } else {
            None
        };
        Ok(Self { ssrcs, reason })
    }
}

fn parse_reception_reports(body: &[u8], count: u8) -> Result<Vec<ReceptionReport>, RtcpError> {
    let mut reports = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let start = i * 24;
        if body.len() < start + 24 {
            break;
        }
        let chunk = &body[start..start + 24];
        let ssrc = u32::from_be_bytes(chunk[0..4].try_into().unwrap());
        let fraction_lost = chunk[4];
        let cumulative_packets_lost = i32::from_be_bytes([0, chunk[5], chunk[6], chunk[7]])
            .wrapping_shl(8)
            .wrapping_shr(8);
        let extended_sequence_number = u32::from_be_bytes(chunk[8..12].try_into().unwrap());
        let jitter = u32::from_be_bytes(chunk[12..16].try_into().unwrap());
        let last_sr_timestamp = u32::from_be_bytes(chunk[16..20].try_into().unwrap());
        let delay_since_last_sr = u32::from_be_bytes(chunk[20..24].try_into().unwrap());
        reports.push(ReceptionReport {
            ssrc,
            fraction_lost,
            cumulative_packets_lost,
            extended_sequence_number,
            jitter,
            last_sr_timestamp,
            delay_since_last_sr,
        });
    }
    Ok(reports)
}

fn put_reception_report(buf: &mut BytesMut, r: &ReceptionReport) {
    buf.put_u32(r.ssrc);
    buf.put_u8(r.fraction_lost);
    let lost_bytes = r.cumulative_packets_lost.to_be_bytes();
    buf.put_u8(lost_bytes[1]);
    buf.put_u8(lost_bytes[2]);
    buf.put_u8(lost_bytes[3]);
    buf.put_u32(r.extended_sequence_number);
    buf.put_u32(r.jitter);
    buf.put_u32(r.last_sr_timestamp);
    buf.put_u32(r.delay_since_last_sr);
}

fn put_header(buf: &mut BytesMut, packet_type: RtcpPacketType, count: u8) {
    let first_byte = (2u8 << 6) | (count & 0x1F);
    buf.put_u8(first_byte);
    buf.put_u8(packet_type as u8);
    buf.put_u16(0); // patched by finalize_length
}

fn finalize_length(buf: &mut BytesMut, header_start: usize) {
    let total_len = buf.len() - header_start;
    let length_words = (total_len / 4).saturating_sub(1) as u16;
    buf[header_start + 2..header_start + 4].copy_from_slice(&length_words.to_be_bytes());
}

/// Parses every RTCP packet in a (possibly compound) datagram, in order.
/// Stops, rather than erroring the whole batch, on the first packet that
/// fails to parse: a caller already decoded every packet before it.
pub fn parse_compound(mut data: &[u8]) -> Result<Vec<RtcpPacket>, RtcpError> {
    let mut packets = Vec::new();
    while data.len() >= 4 {
        let first_byte = data[0];
        let count = first_byte & 0x1F;
        let packet_type_byte = data[1];
        let length_words = u16::from_be_bytes([data[2], data[3]]) as usize;
        let total_len = (length_words + 1) * 4;
        if data.len() < total_len {
            return Err(RtcpError::BodyTooShort);
        }
        let body = &data[4..total_len];

        let packet_type = RtcpPacketType::from_u8(packet_type_byte)
            .ok_or(RtcpError::UnknownPacketType(packet_type_byte))?;
        let packet = match packet_type {
            RtcpPacketType::SenderReport => RtcpPacket::SenderReport(SenderReport::parse(body, count)?),
            RtcpPacketType::ReceiverReport => RtcpPacket::ReceiverReport(ReceiverReport::parse(body, count)?),
            RtcpPacketType::SourceDescription => {
                RtcpPacket::SourceDescription(SourceDescription::parse(body, count)?)
            }
            RtcpPacketType::Goodbye => RtcpPacket::Goodbye(Goodbye::parse(body, count)?),
        };
        packets.push(packet);
        data = &data[total_len..];
    }
    Ok(packets)
}
