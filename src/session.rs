//! `CallSession`: owns one call's sockets, every media-plane component, and
//! the wall-clock origin for its recorder timeline (§4.12). A session is
//! driven by exactly one task (§5) — `run_session` below — which `select!`s
//! over the UDP reader tasks, the scheduler wake, the RTCP interval, the
//! upstream transport's callback channels, and a command channel used by
//! `CallSessionHandle` to ask for stop/stats/flush from another task.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::OptionFuture;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::artifact::{CallArtifactDir, CallMetadata, Speaker, TranscriptWriter};
use crate::codec::CodecDescriptor;
use crate::config::EngineConfig;
use crate::endpoint::{Endpoint, LatchingEndpoint};
use crate::error::{EngineError, StopReason};
use crate::frame_size::FrameSizeDetector;
use crate::jitter_buffer::JitterBuffer;
use crate::pipeline::inbound::{self, InboundFrame};
use crate::pipeline::outbound::{produce, OutboundCursor};
use crate::port_pool::PortPool;
use crate::recorder::channel::ChannelRecorder;
use crate::recorder::stereo::StereoRecorder;
use crate::rtcp_reporter::RtcpReporter;
use crate::rtp::rtcp::{parse_compound, SenderReport};
use crate::scheduler::OutboundScheduler;
use crate::stats::SessionStats;
use crate::transport::{UpstreamCallbacks, UpstreamTransport};
use crate::upstream_queue::UpstreamAudioQueue;

const DUPLICATE_WINDOW: usize = 100;
const RECV_BUF_LEN: usize = 2048;

/// Negotiated parameters a signaling collaborator hands the engine once SDP
/// is settled (§6 `create_session(...)`).
pub struct CreateSessionParams {
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

struct RawDatagram {
    data: Bytes,
    source: SocketAddr,
    arrival: Instant,
}

/// Forwards datagrams off a socket into a channel so the session's own
/// `select!` loop never has to hold a borrow of the socket across the whole
/// iteration — mirrors this codebase's pattern of a dedicated reader task
/// feeding an mpsc channel rather than polling the socket inline.
async fn reader_task(socket: Arc<UdpSocket>, tx: mpsc::Sender<RawDatagram>) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, source)) => {
                let dg = RawDatagram { data: Bytes::copy_from_slice(&buf[..len]), source, arrival: Instant::now() };
                if tx.send(dg).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "udp reader task exiting after recv error");
                break;
            }
        }
    }
}

/// Commands `CallSessionHandle` sends into the running session task.
enum SessionCommand {
    Stop(oneshot::Sender<StopReason>),
    Stats(oneshot::Sender<SessionStats>),
    FlushRecorder(oneshot::Sender<Result<(), EngineError>>),
}

/// External handle to a running session (§3 `CallSessionHandle`). Cheaply
/// `Clone`: every clone shares the same command channel, so the session
/// task itself remains the sole owner of mutable state (§5) no matter how
/// many handles point at it.
#[derive(Clone)]
pub struct CallSessionHandle {
    session_id: String,
    rtp_port: u16,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl CallSessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The locally bound RTP port (RTCP sits at `local_rtp_port() + 1`) —
    /// the embedder reports this back to the peer in its SDP answer.
    pub fn local_rtp_port(&self) -> u16 {
        self.rtp_port
    }

    /// Requests a stop and waits for the session task to finish its
    /// teardown (bounded by `EngineConfig::stop_timeout_ms`). Idempotent:
    /// calling this after the task has already exited returns `LocalError`.
    pub async fn stop(&self) -> StopReason {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(SessionCommand::Stop(tx)).await.is_err() {
            return StopReason::LocalError;
        }
        rx.await.unwrap_or(StopReason::LocalError)
    }

    pub async fn stats(&self) -> Option<SessionStats> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(SessionCommand::Stats(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Forces the jitter buffer's buffered-but-not-yet-due entries to drain
    /// to the recorder without stopping the session.
    pub async fn flush_recorder(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::FlushRecorder(tx))
            .await
            .map_err(|_| EngineError::UpstreamDisconnect("session task no longer running".into()))?;
        rx.await.map_err(|_| EngineError::UpstreamDisconnect("session task dropped the flush response".into()))?
    }
}

/// Owns every piece of mutable per-call state. Constructed fully bound and
/// connected by `start()`; driven to completion by `run_session`.
pub struct CallSession {
    session_id: String,
    codec: CodecDescriptor,
    recording_enabled: bool,
    rtp_port: u16,
    port_pool: Arc<PortPool>,
    stop_timeout: Duration,

    rtp_socket: Arc<UdpSocket>,
    rtcp_socket: Arc<UdpSocket>,
    rtcp_peer_port: Option<u16>,

    latch: LatchingEndpoint,
    detector: FrameSizeDetector,
    jitter: JitterBuffer,
    scheduler: OutboundScheduler,
    outbound_cursor: OutboundCursor,
    upstream_queue: UpstreamAudioQueue,
    rtcp: RtcpReporter,
    stats: SessionStats,

    transport: Box<dyn UpstreamTransport>,
    on_hangup_request: mpsc::Sender<()>,

    inbound_recorder: Option<ChannelRecorder>,
    outbound_recorder: Option<ChannelRecorder>,
    stereo_recorder: Option<StereoRecorder<std::fs::File>>,
    transcript: Option<TranscriptWriter>,
    metadata: Option<CallMetadata>,
    artifact_dir: Option<CallArtifactDir>,

    call_start_wall: DateTime<Utc>,
}

/// Channels fed by the two UDP reader tasks and the upstream transport;
/// owned by `run_session` as plain locals, never struct fields, so a
/// `select!` branch referencing one never holds a borrow that conflicts with
/// `&mut session` in the same arm body.
struct SessionChannels {
    rtp_rx: mpsc::Receiver<RawDatagram>,
    rtcp_rx: mpsc::Receiver<RawDatagram>,
    audio_rx: mpsc::Receiver<Bytes>,
    transcript_rx: mpsc::Receiver<String>,
    hangup_rx: mpsc::Receiver<()>,
}

impl CallSession {
    /// Performs the full start sequence (§4.12): binds sockets, spawns the
    /// datagram reader tasks, initializes the recorder and artifact
    /// directory if enabled, starts the scheduler and sends its priming
    /// burst, and connects the upstream transport. Failure at any step tears
    /// down whatever was already created, in reverse order.
    async fn start(params: CreateSessionParams, config: &EngineConfig, port_pool: Arc<PortPool>, rtp_port: u16) -> Result<(Self, SessionChannels), EngineError> {
        let endpoint = crate::udp::UdpEndpoint::bind(rtp_port).await?;
        let rtp_socket = endpoint.rtp_socket();
        let rtcp_socket = endpoint.rtcp_socket();

        let (rtp_tx, rtp_rx) = mpsc::channel(256);
        let (rtcp_tx, rtcp_rx) = mpsc::channel(32);
        tokio::spawn(reader_task(rtp_socket.clone(), rtp_tx));
        tokio::spawn(reader_task(rtcp_socket.clone(), rtcp_tx));

        let now_instant = Instant::now();
        let now_wall = Utc::now();

        let (mut inbound_recorder, mut outbound_recorder, mut stereo_recorder, mut transcript, mut metadata, mut artifact_dir) =
            (None, None, None, None, None, None);
        if params.recording_enabled {
            let dir = CallArtifactDir::create(&config.recordings_root, now_wall, &params.caller_id)?;
            inbound_recorder = Some(ChannelRecorder::create(dir.inbound_wav(), params.codec.clock_rate_hz)?);
            outbound_recorder = Some(ChannelRecorder::create(dir.outbound_wav(), params.codec.clock_rate_hz)?);
            let stereo_file =
                std::fs::File::create(dir.stereo_wav()).map_err(|e| EngineError::RecorderIoError(e.to_string()))?;
            let samples_per_slot = params.codec.samples_per_frame(20) as usize;
            stereo_recorder = Some(StereoRecorder::new(
                stereo_file,
                now_instant,
                params.codec.clock_rate_hz,
                samples_per_slot,
                config.burst_window_ms,
                config.drift_guard_ms,
            )?);
            metadata = Some(CallMetadata::new(
                params.session_id.clone(),
                params.caller_id.clone(),
                params.codec.name,
                true,
                now_wall,
            ));
            transcript = TranscriptWriter::create(&dir.transcript_txt()).ok();
            artifact_dir = Some(dir);
        }

        let ssrc: u32 = rand::random();
        let initial_sequence: u16 = rand::random();
        let initial_timestamp: u32 = rand::random();

        let (scheduler, priming_ticks) = OutboundScheduler::start(now_instant);
        let mut upstream_queue =
            UpstreamAudioQueue::new(params.codec.clock_rate_hz as usize, params.codec.samples_per_frame(20) as usize);
        let mut outbound_cursor = OutboundCursor::new(initial_sequence, initial_timestamp, ssrc);
        let detector = FrameSizeDetector::new();
        let latch = LatchingEndpoint::new(Endpoint::new(params.remote_address, params.remote_port));
        let target = latch.current_target().to_socket_addr();

        for _ in &priming_ticks {
            let frame = produce(&mut upstream_queue, &params.codec);
            let bytes = outbound_cursor.emit(&params.codec, &detector, frame.payload);
            if let Err(e) = rtp_socket.send_to(&bytes, target).await {
                warn!(session_id = %params.session_id, error = %e, "priming burst send failed");
            }
        }

        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (transcript_tx, transcript_rx) = mpsc::channel(64);
        let (hangup_tx, hangup_rx) = mpsc::channel(4);
        let mut transport = (params.transport_factory)();
        transport.connect(UpstreamCallbacks { audio_tx, transcript_tx, hangup_tx }).await?;

        let session = CallSession {
            session_id: params.session_id,
            codec: params.codec,
            recording_enabled: params.recording_enabled,
            rtp_port,
            port_pool,
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            rtp_socket,
            rtcp_socket,
            rtcp_peer_port: None,
            latch,
            detector,
            jitter: JitterBuffer::new(config.jitter_buffer_default_ms, DUPLICATE_WINDOW),
            scheduler,
            outbound_cursor,
            upstream_queue,
            rtcp: RtcpReporter::new(ssrc, Duration::from_secs(config.rtcp_interval_secs)),
            stats: SessionStats::default(),
            transport,
            on_hangup_request: params.on_hangup_request,
            inbound_recorder,
            outbound_recorder,
            stereo_recorder,
            transcript,
            metadata,
            artifact_dir,
            call_start_wall: now_wall,
        };

        let channels = SessionChannels { rtp_rx, rtcp_rx, audio_rx, transcript_rx, hangup_rx };
        Ok((session, channels))
    }

    async fn on_rtp_datagram(&mut self, dg: RawDatagram) {
        let source = Endpoint::from(dg.source);
        let frames = inbound::handle_datagram(
            &self.session_id,
            &dg.data,
            source,
            dg.arrival,
            &mut self.latch,
            &mut self.detector,
            &mut self.jitter,
            &self.codec,
        );
        self.fan_out_inbound(frames).await;
    }

    fn on_rtcp_datagram(&mut self, dg: RawDatagram) {
        match parse_compound(&dg.data) {
            Ok(packets) => {
                self.rtcp.note_incoming(&packets, dg.arrival);
                self.rtcp_peer_port = Some(dg.source.port());
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "dropping unparseable RTCP datagram");
            }
        }
    }

    async fn fan_out_inbound(&mut self, frames: Vec<InboundFrame>) {
        for frame in frames {
            self.stats.note_received(frame.payload.len(), Utc::now());

            if let Some(rec) = &mut self.inbound_recorder {
                let pcm = self.codec.to_linear_pcm(&frame.payload);
                if !pcm.is_empty() {
                    if let Err(e) = rec.write_frame(&pcm) {
                        warn!(session_id = %self.session_id, error = %e, "inbound recorder write failed");
                    }
                }
            }
            if let Some(stereo) = &mut self.stereo_recorder {
                let pcm = self.codec.to_linear_pcm(&frame.payload);
                if let Err(e) = stereo.push_inbound(frame.arrival, pcm) {
                    warn!(session_id = %self.session_id, error = %e, "stereo recorder inbound push failed");
                }
            }
            if let Err(e) = self.transport.send_audio(frame.payload.clone()).await {
                warn!(session_id = %self.session_id, error = %e, "failed to forward inbound audio upstream");
            }
        }
        self.stats.update_jitter(self.jitter.stats());
    }

    async fn emit_tick(&mut self, k: u64) {
        let frame = produce(&mut self.upstream_queue, &self.codec);
        let is_ai_audio = frame.is_ai_audio;
        let bytes = self.outbound_cursor.emit(&self.codec, &self.detector, frame.payload.clone());
        let target = self.latch.current_target().to_socket_addr();

        if let Err(e) = self.rtp_socket.send_to(&bytes, target).await {
            warn!(session_id = %self.session_id, error = %e, "failed to send outbound RTP packet");
            return;
        }
        self.stats.note_sent(bytes.len());

        let pcm = self.codec.to_linear_pcm(&frame.payload);
        if let Some(rec) = &mut self.outbound_recorder {
            if !pcm.is_empty() {
                if let Err(e) = rec.write_frame(&pcm) {
                    warn!(session_id = %self.session_id, error = %e, "outbound recorder write failed");
                }
            }
        }
        if let Some(stereo) = &mut self.stereo_recorder {
            if let Err(e) = stereo.push_outbound(k, pcm) {
                warn!(session_id = %self.session_id, error = %e, "stereo recorder outbound push failed");
            }
        }
        let _ = is_ai_audio; // retained on OutboundFrame for callers that want it; unused here beyond logging intent.
    }

    async fn handle_jitter_tick(&mut self) {
        let emissions = self.jitter.tick(Instant::now());
        let frames = inbound::timeout_frames(emissions, &self.codec, Instant::now());
        self.fan_out_inbound(frames).await;
    }

    async fn send_rtcp_report(&mut self) {
        let now = Instant::now();
        let sr: SenderReport = self.rtcp.build_sender_report(
            now,
            Utc::now(),
            self.outbound_cursor.timestamp(),
            self.stats.packets_sent as u32,
            self.stats.bytes_sent as u32,
        );
        let target_ip = self.latch.current_target().address;
        let target_port = self.rtcp_peer_port.unwrap_or(self.latch.current_target().port + 1);
        let target = SocketAddr::new(target_ip, target_port);
        if let Err(e) = self.rtcp_socket.send_to(&sr.serialize(), target).await {
            warn!(session_id = %self.session_id, error = %e, "failed to send RTCP sender report");
        }
    }

    fn flush_jitter_buffer(&mut self) -> Vec<InboundFrame> {
        let emissions = self.jitter.flush();
        inbound::timeout_frames(emissions, &self.codec, Instant::now())
    }

    /// Runs the stop sequence (§4.12) and returns the final reason. Bounded
    /// by `stop_timeout`; a recorder or transport that hangs past that bound
    /// is abandoned rather than awaited indefinitely.
    async fn shutdown(mut self, reason: StopReason) -> StopReason {
        let deadline = tokio::time::Instant::now() + self.stop_timeout;

        self.scheduler.stop();
        self.upstream_queue.discard_partial();

        if tokio::time::timeout_at(deadline, self.transport.close()).await.is_err() {
            warn!(session_id = %self.session_id, "upstream transport close exceeded stop timeout");
        }

        let flushed = self.flush_jitter_buffer();
        self.fan_out_inbound(flushed).await;

        self.port_pool.release(self.rtp_port).await;

        if self.recording_enabled {
            if let Some(rec) = self.inbound_recorder.take() {
                if let Err(e) = rec.finalize() {
                    warn!(session_id = %self.session_id, error = %e, "inbound recorder finalize failed");
                }
            }
            if let Some(rec) = self.outbound_recorder.take() {
                if let Err(e) = rec.finalize() {
                    warn!(session_id = %self.session_id, error = %e, "outbound recorder finalize failed");
                }
            }
            if let Some(stereo) = self.stereo_recorder.take() {
                if let Err(e) = stereo.finalize() {
                    warn!(session_id = %self.session_id, error = %e, "stereo recorder finalize failed");
                }
            }
            if let (Some(mut metadata), Some(dir)) = (self.metadata.take(), self.artifact_dir.as_ref()) {
                metadata.finalize(Utc::now(), reason, self.stats);
                if let Err(e) = metadata.write_to(&dir.metadata_json()) {
                    warn!(session_id = %self.session_id, error = %e, "failed to write call metadata");
                }
            }
        }

        info!(session_id = %self.session_id, reason = %reason, "call session stopped");
        reason
    }
}

/// The session task's body: runs until `stop()` is requested, the peer
/// requests hangup, or the upstream transport signals one. Owns `session`
/// and `channels` outright — disjoint locals, so no field of one is ever
/// borrowed across a call that needs the other.
async fn run_session(mut session: CallSession, mut channels: SessionChannels, mut cmd_rx: mpsc::Receiver<SessionCommand>) {
    loop {
        let wake: OptionFuture<_> = session.scheduler.next_wake().map(|w| tokio::time::sleep_until(w.into())).into();
        let jitter_wake: OptionFuture<_> = session.jitter.next_deadline().map(|w| tokio::time::sleep_until(w.into())).into();
        let rtcp_wake: OptionFuture<_> =
            session.rtcp.next_deadline(session.latch.is_latched()).map(|w| tokio::time::sleep_until(w.into())).into();

        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Stop(ack)) => {
                        let reason = session.shutdown(StopReason::Normal).await;
                        let _ = ack.send(reason);
                        return;
                    }
                    Some(SessionCommand::Stats(ack)) => {
                        let _ = ack.send(session.stats);
                    }
                    Some(SessionCommand::FlushRecorder(ack)) => {
                        let frames = session.flush_jitter_buffer();
                        session.fan_out_inbound(frames).await;
                        let _ = ack.send(Ok(()));
                    }
                    None => return,
                }
            }

            Some(dg) = channels.rtp_rx.recv() => {
                session.on_rtp_datagram(dg).await;
            }

            Some(dg) = channels.rtcp_rx.recv() => {
                session.on_rtcp_datagram(dg);
            }

            Some(_) = wake => {
                let k = session.scheduler.fire();
                session.emit_tick(k).await;
            }

            Some(_) = jitter_wake => {
                session.handle_jitter_tick().await;
            }

            Some(_) = rtcp_wake => {
                session.send_rtcp_report().await;
            }

            Some(bytes) = channels.audio_rx.recv() => {
                session.upstream_queue.push(&bytes);
            }

            Some(text) = channels.transcript_rx.recv() => {
                if let Some(tw) = &mut session.transcript {
                    if let Err(e) = tw.append(Utc::now(), Speaker::Ai, &text) {
                        warn!(session_id = %session.session_id, error = %e, "transcript write failed");
                    }
                }
            }

            Some(()) = channels.hangup_rx.recv() => {
                let _ = session.on_hangup_request.try_send(());
                session.shutdown(StopReason::PeerHangup).await;
                return;
            }
        }
    }
}

/// Spawns a session task and returns its handle. Binding/connect failures
/// surface before anything is spawned, matching §4.12's "failure to connect
/// upstream propagates as a session-start error; partial setup is torn down
/// in reverse" requirement.
pub(crate) async fn spawn_session(
    params: CreateSessionParams,
    config: &EngineConfig,
    port_pool: Arc<PortPool>,
    rtp_port: u16,
) -> Result<CallSessionHandle, EngineError> {
    let session_id = params.session_id.clone();
    let start_result = CallSession::start(params, config, port_pool.clone(), rtp_port).await;
    let (session, channels) = match start_result {
        Ok(v) => v,
        Err(e) => {
            port_pool.release(rtp_port).await;
            return Err(e);
        }
    };

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    tokio::spawn(run_session(session, channels, cmd_rx));
    Ok(CallSessionHandle { session_id, rtp_port, cmd_tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::net::Ipv4Addr;
    use tokio::net::UdpSocket as TokioUdpSocket;

    struct SilentTransport;

    #[async_trait]
    impl UpstreamTransport for SilentTransport {
        async fn connect(&mut self, _callbacks: UpstreamCallbacks) -> Result<(), EngineError> {
            Ok(())
        }
        async fn send_audio(&mut self, _codec_bytes: Bytes) -> Result<(), EngineError> {
            Ok(())
        }
        async fn send_event(&mut self, _event: Value) -> Result<(), EngineError> {
            Ok(())
        }
        async fn close(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn test_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.stop_timeout_ms = 500;
        cfg.rtcp_interval_secs = 5;
        cfg
    }

    #[tokio::test]
    async fn start_sends_priming_burst_to_signaled_endpoint() {
        let peer = TokioUdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let pool = Arc::new(PortPool::new(31600, 31700));
        let (rtp_port, _rtcp_port) = pool.allocate().await.unwrap();
        let (hangup_tx, _hangup_rx) = mpsc::channel(1);

        let params = CreateSessionParams {
            session_id: "call-1".into(),
            local_rtp_port_hint: None,
            remote_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            remote_port: peer_addr.port(),
            codec: CodecDescriptor::pcma(),
            caller_id: "+15551234567".into(),
            recording_enabled: false,
            transport_factory: Box::new(|| Box::new(SilentTransport)),
            on_hangup_request: hangup_tx,
        };

        let config = test_config();
        let (session, _channels) = CallSession::start(params, &config, pool.clone(), rtp_port).await.unwrap();

        let mut buf = [0u8; 256];
        let (len, _from) = tokio::time::timeout(Duration::from_millis(200), peer.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(len, 172); // 12-byte header + 160-byte PCMA silence frame
        assert_eq!(&buf[12..len], &vec![0xD5u8; 160][..]);

        drop(session);
    }

    #[tokio::test]
    async fn handle_stop_releases_the_port_back_to_the_pool() {
        let peer = TokioUdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let pool = Arc::new(PortPool::new(31710, 31800));
        let (rtp_port, _) = pool.allocate().await.unwrap();
        let (hangup_tx, _hangup_rx) = mpsc::channel(1);

        let params = CreateSessionParams {
            session_id: "call-2".into(),
            local_rtp_port_hint: None,
            remote_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            remote_port: peer_addr.port(),
            codec: CodecDescriptor::pcmu(),
            caller_id: "caller".into(),
            recording_enabled: false,
            transport_factory: Box::new(|| Box::new(SilentTransport)),
            on_hangup_request: hangup_tx,
        };

        let config = test_config();
        let handle = spawn_session(params, &config, pool.clone(), rtp_port).await.unwrap();
        assert_eq!(pool.in_use_count().await, 1);

        let reason = handle.stop().await;
        assert_eq!(reason, StopReason::Normal);
        assert_eq!(pool.in_use_count().await, 0);
    }
}
