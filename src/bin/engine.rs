//! Minimal standalone runner: loads `EngineConfig` from the environment,
//! installs a structured logging subscriber, and demonstrates the engine's
//! external surface end to end with a stub upstream transport that just
//! echoes caller audio back as comfort noise. A real deployment supplies
//! its own `UpstreamTransport` wired to an actual cloud AI voice service;
//! this binary exists to exercise `SessionManager` the way an embedder
//! would, not to be that embedder.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use telephony_media_bridge::transport::{UpstreamCallbacks, UpstreamTransport};
use telephony_media_bridge::{codec::CodecDescriptor, CreateSessionRequest, EngineConfig, EngineError, SessionManager};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stands in for a real cloud AI transport: accepts connection, drops
/// whatever audio it's handed, never talks back. Useful for smoke-testing
/// the RTP/jitter/recording plane without a live upstream dependency.
struct NullTransport;

#[async_trait]
impl UpstreamTransport for NullTransport {
    async fn connect(&mut self, _callbacks: UpstreamCallbacks) -> Result<(), EngineError> {
        tracing::info!("null upstream transport connected");
        Ok(())
    }

    async fn send_audio(&mut self, _codec_bytes: Bytes) -> Result<(), EngineError> {
        Ok(())
    }

    async fn send_event(&mut self, event: Value) -> Result<(), EngineError> {
        tracing::debug!(?event, "null upstream transport dropped outbound event");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = EngineConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(?config, "engine configuration loaded");

    let manager = SessionManager::new(config);

    let (hangup_tx, mut hangup_rx) = mpsc::channel(1);
    let request = CreateSessionRequest {
        session_id: "demo-call-1".to_string(),
        local_rtp_port_hint: None,
        remote_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        remote_port: 40000,
        codec: CodecDescriptor::pcmu(),
        caller_id: "+15555550100".to_string(),
        recording_enabled: true,
        transport_factory: Box::new(|| Box::new(NullTransport)),
        on_hangup_request: hangup_tx,
    };

    let handle = manager.create_session(request).await?;
    tracing::info!(session_id = handle.session_id(), "demo session running");

    tokio::select! {
        _ = hangup_rx.recv() => {
            tracing::info!("upstream requested hangup");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, stopping demo session");
        }
    }

    let reason = handle.stop().await;
    tracing::info!(%reason, "demo session stopped");
    Ok(())
}
