//! Abstract duplex capability to the upstream cloud AI audio service (§6).
//! Transport choice (which WebSocket vendor, auth, reconnect policy) is
//! injected by the application embedding this crate and is out of scope
//! here; this module only defines the boundary and its base64 convention.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::EngineError;

/// Channels the transport is given at `connect()` time and pushes events
/// into, rather than literal closures — composes better with cancellation
/// and lets the receiving task `select!` over them alongside everything else.
pub struct UpstreamCallbacks {
    pub audio_tx: mpsc::Sender<Bytes>,
    pub transcript_tx: mpsc::Sender<String>,
    pub hangup_tx: mpsc::Sender<()>,
}

#[async_trait]
pub trait UpstreamTransport: Send {
    async fn connect(&mut self, callbacks: UpstreamCallbacks) -> Result<(), EngineError>;

    /// Raw codec-framed audio bytes; base64-encodes at the wire boundary.
    async fn send_audio(&mut self, codec_bytes: Bytes) -> Result<(), EngineError>;

    async fn send_event(&mut self, event: Value) -> Result<(), EngineError>;

    async fn close(&mut self) -> Result<(), EngineError>;
}

pub fn encode_audio_frame(codec_bytes: &[u8]) -> String {
    BASE64.encode(codec_bytes)
}

pub fn decode_audio_frame(base64_bytes: &str) -> Result<Bytes, EngineError> {
    BASE64
        .decode(base64_bytes)
        .map(Bytes::from)
        .map_err(|e| EngineError::ParseFailure(format!("invalid base64 upstream audio frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64_boundary() {
        let original = [0u8, 1, 2, 250, 251, 252, 253, 254, 255];
        let encoded = encode_audio_frame(&original);
        let decoded = decode_audio_frame(&encoded).unwrap();
        assert_eq!(&decoded[..], &original[..]);
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode_audio_frame("not valid base64!!").is_err());
    }

    struct StubTransport {
        connected: bool,
    }

    #[async_trait]
    impl UpstreamTransport for StubTransport {
        async fn connect(&mut self, _callbacks: UpstreamCallbacks) -> Result<(), EngineError> {
            self.connected = true;
            Ok(())
        }

        async fn send_audio(&mut self, _codec_bytes: Bytes) -> Result<(), EngineError> {
            if self.connected {
                Ok(())
            } else {
                Err(EngineError::UpstreamDisconnect("not connected".into()))
            }
        }

        async fn send_event(&mut self, _event: Value) -> Result<(), EngineError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), EngineError> {
            self.connected = false;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stub_transport_is_boxable_and_object_safe() {
        let mut transport: Box<dyn UpstreamTransport> = Box::new(StubTransport { connected: false });
        let (audio_tx, _audio_rx) = mpsc::channel(8);
        let (transcript_tx, _transcript_rx) = mpsc::channel(8);
        let (hangup_tx, _hangup_rx) = mpsc::channel(1);
        transport.connect(UpstreamCallbacks { audio_tx, transcript_tx, hangup_tx }).await.unwrap();
        transport.send_audio(Bytes::from_static(&[1, 2, 3])).await.unwrap();
        transport.close().await.unwrap();
    }
}
