//! Codec-aware frame sizing, silence synthesis and PCM conversion.
//!
//! Supports G.711 (A-law/mu-law) natively; G.722 and OPUS are carried as
//! opaque payloads (see `to_linear_pcm`'s behavior for those codecs).

use bytes::Bytes;
use thiserror::Error;

/// Named codec families this engine understands at the RTP/recording boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecName {
    Pcmu,
    Pcma,
    G722,
    Opus,
}

impl CodecName {
    pub fn sdp_name(&self) -> &'static str {
        match self {
            CodecName::Pcmu => "PCMU",
            CodecName::Pcma => "PCMA",
            CodecName::G722 => "G722",
            CodecName::Opus => "OPUS",
        }
    }
}

/// Immutable-for-session codec parameters (§3 "Codec descriptor").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub name: CodecName,
    pub payload_type: u8,
    pub clock_rate_hz: u32,
    pub channels: u8,
}

impl CodecDescriptor {
    pub fn pcmu() -> Self {
        Self { name: CodecName::Pcmu, payload_type: 0, clock_rate_hz: 8000, channels: 1 }
    }

    pub fn pcma() -> Self {
        Self { name: CodecName::Pcma, payload_type: 8, clock_rate_hz: 8000, channels: 1 }
    }

    /// G.722's real sample rate is 16kHz but RFC 3551 fixes its RTP clock-rate
    /// field at 8kHz. The quirk is preserved rather than "corrected".
    pub fn g722(payload_type: u8) -> Self {
        Self { name: CodecName::G722, payload_type, clock_rate_hz: 8000, channels: 1 }
    }

    pub fn opus(payload_type: u8) -> Self {
        Self { name: CodecName::Opus, payload_type, clock_rate_hz: 48000, channels: 2 }
    }

    /// Number of samples in `duration_ms` of audio at this codec's clock rate.
    pub fn samples_per_frame(&self, duration_ms: u32) -> u32 {
        self.clock_rate_hz / 1000 * duration_ms
    }

    /// Recover a sample count from an observed payload length, for codecs
    /// with a fixed bytes-per-sample ratio. Variable-rate codecs (OPUS)
    /// return `None`: payload length alone doesn't determine sample count.
    pub fn samples_from_payload(&self, payload_len: usize) -> Option<u32> {
        match self.name {
            CodecName::Pcmu | CodecName::Pcma => Some(payload_len as u32),
            CodecName::G722 => Some(payload_len as u32),
            CodecName::Opus => None,
        }
    }

    /// A comfort-noise/silence payload of `duration_ms` for this codec.
    pub fn silence_payload(&self, duration_ms: u32) -> Bytes {
        match self.name {
            CodecName::Pcmu => {
                Bytes::from(vec![0xFFu8; (self.clock_rate_hz / 1000 * duration_ms) as usize])
            }
            CodecName::Pcma => {
                Bytes::from(vec![0xD5u8; (self.clock_rate_hz / 1000 * duration_ms) as usize])
            }
            CodecName::G722 => {
                Bytes::from(vec![0x00u8; (self.clock_rate_hz / 1000 * duration_ms) as usize])
            }
            CodecName::Opus => Bytes::from_static(&[0xF8, 0xFF, 0xFE]),
        }
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        if self.payload_type > 127 {
            return Err(CodecError::InvalidPayloadType(self.payload_type));
        }
        if self.clock_rate_hz == 0 {
            return Err(CodecError::InvalidClockRate(self.clock_rate_hz));
        }
        if self.channels == 0 {
            return Err(CodecError::InvalidChannelCount(self.channels));
        }
        Ok(())
    }

    /// Decode a payload to linear 16-bit PCM. Only defined for G.711; callers
    /// must not invoke this for G.722/OPUS (stereo mixing is undefined for
    /// those per the spec's pass-through decision, see DESIGN.md).
    pub fn to_linear_pcm(&self, payload: &[u8]) -> Vec<i16> {
        match self.name {
            CodecName::Pcmu => payload.iter().map(|&b| ulaw_to_linear(b)).collect(),
            CodecName::Pcma => payload.iter().map(|&b| alaw_to_linear(b)).collect(),
            CodecName::G722 | CodecName::Opus => Vec::new(),
        }
    }

    /// Encode linear 16-bit PCM back to this codec's wire format. Only
    /// defined for G.711.
    pub fn from_linear_pcm(&self, pcm: &[i16]) -> Vec<u8> {
        match self.name {
            CodecName::Pcmu => pcm.iter().map(|&s| linear_to_ulaw(s)).collect(),
            CodecName::Pcma => pcm.iter().map(|&s| linear_to_alaw(s)).collect(),
            CodecName::G722 | CodecName::Opus => Vec::new(),
        }
    }

    /// Linear PCM samples round-trip through this codec (used when stereo
    /// mixing decodes both legs to PCM). Undefined (empty) for non-G.711.
    pub fn supports_linear_pcm(&self) -> bool {
        matches!(self.name, CodecName::Pcmu | CodecName::Pcma)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid RTP payload type: {0}")]
    InvalidPayloadType(u8),
    #[error("invalid clock rate: {0}")]
    InvalidClockRate(u32),
    #[error("invalid channel count: {0}")]
    InvalidChannelCount(u8),
}

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

fn linear_to_ulaw(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x80 } else { 0x00 };

    let mut sample = if sample < 0 {
        (-(sample as i32)).min(ULAW_CLIP)
    } else {
        (sample as i32).min(ULAW_CLIP)
    };
    sample += ULAW_BIAS;

    let exponent = match sample {
        s if s >= 0x4000 => 7,
        s if s >= 0x2000 => 6,
        s if s >= 0x1000 => 5,
        s if s >= 0x0800 => 4,
        s if s >= 0x0400 => 3,
        s if s >= 0x0200 => 2,
        s if s >= 0x0100 => 1,
        _ => 0,
    };
    let mantissa = (sample >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) | mantissa as u8)
}

fn ulaw_to_linear(ulaw: u8) -> i16 {
    let ulaw = !ulaw;

    let sign = ulaw & 0x80;
    let exponent = ((ulaw >> 4) & 0x07) as i32;
    let mantissa = (ulaw & 0x0F) as i32;

    let mut sample = ((mantissa << 3) + ULAW_BIAS) << exponent;
    sample -= ULAW_BIAS;

    if sign != 0 { -sample as i16 } else { sample as i16 }
}

const ALAW_CLIP: i32 = 32767;

fn linear_to_alaw(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x00 } else { 0x80 };

    let mut sample = if sample < 0 {
        (-(sample as i32)).min(ALAW_CLIP)
    } else {
        (sample as i32).min(ALAW_CLIP)
    };

    let (exponent, mantissa) = if sample >= 256 {
        let exp = match sample {
            s if s >= 0x4000 => 7,
            s if s >= 0x2000 => 6,
            s if s >= 0x1000 => 5,
            s if s >= 0x0800 => 4,
            s if s >= 0x0400 => 3,
            s if s >= 0x0200 => 2,
            s if s >= 0x0100 => 1,
            _ => 0,
        };
        sample >>= exp + 3;
        (exp, (sample & 0x0F) as u8)
    } else {
        sample >>= 4;
        (0, (sample & 0x0F) as u8)
    };

    (sign | (exponent << 4) | mantissa) ^ 0x55
}

fn alaw_to_linear(alaw: u8) -> i16 {
    let alaw = alaw ^ 0x55;

    let sign = alaw & 0x80;
    let exponent = ((alaw >> 4) & 0x07) as i32;
    let mantissa = (alaw & 0x0F) as i32;

    let mut sample = if exponent > 0 {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    } else {
        (mantissa << 4) + 0x08
    };

    if sign == 0 {
        sample = -sample;
    }

    sample as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_byte_roundtrip_exact_for_all_256_values() {
        for b in 0u8..=255 {
            let pcm = ulaw_to_linear(b);
            let back = linear_to_ulaw(pcm);
            assert_eq!(back, b, "mu-law byte {b:#x} did not round-trip");
        }
    }

    #[test]
    fn alaw_byte_roundtrip_exact_for_all_256_values() {
        for b in 0u8..=255 {
            let pcm = alaw_to_linear(b);
            let back = linear_to_alaw(pcm);
            assert_eq!(back, b, "A-law byte {b:#x} did not round-trip");
        }
    }

    #[test]
    fn silence_payload_matches_declared_comfort_byte() {
        let pcmu = CodecDescriptor::pcmu();
        assert!(pcmu.silence_payload(20).iter().all(|&b| b == 0xFF));
        let pcma = CodecDescriptor::pcma();
        assert!(pcma.silence_payload(20).iter().all(|&b| b == 0xD5));
        let opus = CodecDescriptor::opus(111);
        assert_eq!(&opus.silence_payload(20)[..], &[0xF8, 0xFF, 0xFE]);
    }

    #[test]
    fn samples_per_frame_g711_20ms_is_160() {
        assert_eq!(CodecDescriptor::pcmu().samples_per_frame(20), 160);
        assert_eq!(CodecDescriptor::pcma().samples_per_frame(20), 160);
    }

    #[test]
    fn validate_rejects_bad_descriptors() {
        let mut d = CodecDescriptor::pcmu();
        d.payload_type = 200;
        assert_eq!(d.validate(), Err(CodecError::InvalidPayloadType(200)));

        let mut d = CodecDescriptor::pcmu();
        d.clock_rate_hz = 0;
        assert_eq!(d.validate(), Err(CodecError::InvalidClockRate(0)));

        let mut d = CodecDescriptor::pcmu();
        d.channels = 0;
        assert_eq!(d.validate(), Err(CodecError::InvalidChannelCount(0)));
    }

    #[test]
    fn opus_samples_from_payload_is_none() {
        assert_eq!(CodecDescriptor::opus(111).samples_from_payload(160), None);
    }
}
