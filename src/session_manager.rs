//! Top-level engine entry point (§6 `create_session`). Owns the shared
//! `PortPool` and the set of currently live sessions; everything else about
//! a call lives inside its own `CallSession` task.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::codec::CodecDescriptor;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::session::{spawn_session, CallSessionHandle, CreateSessionParams};
use crate::transport::UpstreamTransport;

/// Everything a caller needs to supply to bring a session's media plane up.
/// Mirrors `CreateSessionParams` but without the port-pool/config plumbing
/// the manager itself is responsible for.
pub struct CreateSessionRequest {
    pub session_id: String,
    pub local_rtp_port_hint: Option<u16>,
    pub remote_address: IpAddr,
    pub remote_port: u16,
    pub codec: CodecDescriptor,
    pub caller_id: String,
    pub recording_enabled: bool,
    pub transport_factory: Box<dyn FnOnce() -> Box<dyn UpstreamTransport> + Send>,
    pub on_hangup_request: mpsc::Sender<()>,
}

/// Owns the RTP port pool shared across every live call and the registry of
/// running sessions (§5: "the RTP port pool is the one piece of state
/// shared across sessions and must be mutex-protected").
pub struct SessionManager {
    config: EngineConfig,
    port_pool: Arc<crate::port_pool::PortPool>,
    sessions: Mutex<HashMap<String, CallSessionHandle>>,
}

impl SessionManager {
    pub fn new(config: EngineConfig) -> Self {
        let port_pool = Arc::new(crate::port_pool::PortPool::new(config.port_min, config.port_max));
        Self { config, port_pool, sessions: Mutex::new(HashMap::new()) }
    }

    /// Allocates a port pair, then performs the full eager start sequence
    /// (bind, record, prime, connect upstream) before returning a live
    /// handle — there is no separate "created but not started" state (§9
    /// design decision).
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<CallSessionHandle, EngineError> {
        let (rtp_port, _rtcp_port) = self.port_pool.allocate().await?;

        let params = CreateSessionParams {
            session_id: request.session_id.clone(),
            local_rtp_port_hint: request.local_rtp_port_hint,
            remote_address: request.remote_address,
            remote_port: request.remote_port,
            codec: request.codec,
            caller_id: request.caller_id,
            recording_enabled: request.recording_enabled,
            transport_factory: request.transport_factory,
            on_hangup_request: request.on_hangup_request,
        };

        let handle = spawn_session(params, &self.config, self.port_pool.clone(), rtp_port).await?;

        self.sessions.lock().await.insert(request.session_id.clone(), handle.clone());
        info!(session_id = %request.session_id, rtp_port, "call session started");

        Ok(handle)
    }

    /// Looks up a live session's handle by id. Entries are removed from the
    /// registry only by `stop_session` — a session that exits on its own
    /// (peer hangup, upstream failure) remains registered until a caller
    /// notices and stops it, matching the "caller drives teardown" model.
    pub async fn handle_for(&self, session_id: &str) -> Option<CallSessionHandle> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Requests a stop on the named session and removes it from the
    /// registry once the stop completes.
    pub async fn stop_session(&self, session_id: &str) -> Option<crate::error::StopReason> {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(session_id)
        }?;
        Some(handle.stop().await)
    }

    pub async fn active_session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
