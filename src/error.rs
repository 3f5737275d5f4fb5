//! Crate-wide error taxonomy. Kinds mirror the engine's propagation policy:
//! some are fatal to a session, some are per-packet and absorbed, some are
//! never surfaced as errors at all (jitter-buffer loss, queue underrun use
//! plain return values, not this enum).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("no RTP ports available in configured range")]
    PortAllocationFailure,

    #[error("failed to bind UDP socket: {0}")]
    SocketBindFailure(#[from] std::io::Error),

    #[error("failed to parse incoming packet: {0}")]
    ParseFailure(String),

    #[error("packet rejected from invalid source {0}")]
    InvalidSource(std::net::SocketAddr),

    #[error("upstream AI transport disconnected: {0}")]
    UpstreamDisconnect(String),

    #[error("recorder I/O error: {0}")]
    RecorderIoError(String),

    #[error("session stop exceeded its bound and was forced")]
    StopTimeout,
}

/// Why a session's final state was reached (§7 "user-visible behavior").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Normal,
    PeerHangup,
    UpstreamFailure,
    LocalError,
    Timeout,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Normal => "normal",
            StopReason::PeerHangup => "peer_hangup",
            StopReason::UpstreamFailure => "upstream_failure",
            StopReason::LocalError => "local_error",
            StopReason::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

impl From<crate::codec::CodecError> for EngineError {
    fn from(e: crate::codec::CodecError) -> Self {
        EngineError::ConfigError(e.to_string())
    }
}

impl From<crate::rtp::RtpError> for EngineError {
    fn from(e: crate::rtp::RtpError) -> Self {
        EngineError::ParseFailure(e.to_string())
    }
}
