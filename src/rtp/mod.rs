//! RTP packet parsing/serialization (RFC 3550) and RTCP (this module's
//! `rtcp` submodule).

pub mod rtcp;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtpError {
    #[error("RTP packet too short: {0} bytes")]
    TooShort(usize),
}

/// Fixed RTP header (RFC 3550 §5.1). CSRC list and header extensions are
/// parsed for offset purposes but not retained: this engine never relays
/// contributing sources or extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(12);

        let first_byte = (self.version << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | self.csrc_count;
        buf.put_u8(first_byte);

        let second_byte = ((self.marker as u8) << 7) | self.payload_type;
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        buf
    }

    /// Parses a header, returning it and the byte offset of the payload.
    /// Rejects packets shorter than 12 bytes. A version other than 2 is
    /// accepted with a caller-visible flag rather than rejected: some
    /// interop partners have been observed to send malformed versions, and
    /// dropping them would lose otherwise-usable audio.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), RtpError> {
        if data.len() < 12 {
            return Err(RtpError::TooShort(data.len()));
        }

        let first_byte = data[0];
        let version = first_byte >> 6;
        let padding = (first_byte >> 5) & 1 == 1;
        let extension = (first_byte >> 4) & 1 == 1;
        let csrc_count = first_byte & 0x0F;

        let second_byte = data[1];
        let marker = (second_byte >> 7) & 1 == 1;
        let payload_type = second_byte & 0x7F;

        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let header_len = 12 + (csrc_count as usize * 4);

        Ok((
            Self {
                version,
                padding,
                extension,
                csrc_count,
                marker,
                payload_type,
                sequence,
                timestamp,
                ssrc,
            },
            header_len.min(data.len()),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: impl Into<Bytes>) -> Self {
        Self { header, payload: payload.into() }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = self.header.to_bytes();
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, RtpError> {
        let (header, header_len) = RtpHeader::from_bytes(data)?;
        let payload = Bytes::copy_from_slice(&data[header_len..]);
        Ok(Self { header, payload })
    }
}

/// `(a - b) mod 2^16`, interpreted as a signed 16-bit delta. Used throughout
/// the jitter buffer and scheduler for wrap-safe sequence comparisons.
pub fn seq_delta(a: u16, b: u16) -> i32 {
    (a.wrapping_sub(b)) as i16 as i32
}

/// True if `a` is strictly newer than `b` under 16-bit wraparound, using the
/// spec's tie-break convention: a difference whose magnitude exceeds 32768
/// is interpreted as the smaller value being "newer" (wrapped around).
pub fn seq_is_newer(a: u16, b: u16) -> bool {
    seq_delta(a, b) > 0
}
