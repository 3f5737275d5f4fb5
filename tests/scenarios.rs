//! End-to-end scenarios driving `CallSession` through real UDP traffic and a
//! stub upstream transport, in the style of this codebase's own
//! recording-integration test suite: synthetic packet generators plus
//! assertions on the pipeline's observable effects (captured audio,
//! counters, recorded files) rather than mocking any of the pipeline
//! stages themselves.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use telephony_media_bridge::codec::CodecDescriptor;
use telephony_media_bridge::error::EngineError;
use telephony_media_bridge::rtp::{RtpHeader, RtpPacket};
use telephony_media_bridge::transport::{UpstreamCallbacks, UpstreamTransport};
use telephony_media_bridge::{CreateSessionRequest, EngineConfig, SessionManager};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Captures every inbound frame the engine forwards upstream, and exposes
/// the upstream-audio channel once `connect()` runs so a test can push
/// synthetic AI audio the same way a real transport's read loop would.
struct CapturingTransport {
    received: Arc<Mutex<Vec<Bytes>>>,
    audio_tx_slot: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
}

#[async_trait]
impl UpstreamTransport for CapturingTransport {
    async fn connect(&mut self, callbacks: UpstreamCallbacks) -> Result<(), EngineError> {
        *self.audio_tx_slot.lock().unwrap() = Some(callbacks.audio_tx);
        Ok(())
    }

    async fn send_audio(&mut self, codec_bytes: Bytes) -> Result<(), EngineError> {
        self.received.lock().unwrap().push(codec_bytes);
        Ok(())
    }

    async fn send_event(&mut self, _event: Value) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

struct Harness {
    received: Arc<Mutex<Vec<Bytes>>>,
    audio_tx_slot: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
}

impl Harness {
    fn new() -> (Self, Box<dyn FnOnce() -> Box<dyn UpstreamTransport> + Send>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let audio_tx_slot = Arc::new(Mutex::new(None));
        let (r, a) = (received.clone(), audio_tx_slot.clone());
        let factory: Box<dyn FnOnce() -> Box<dyn UpstreamTransport> + Send> =
            Box::new(move || Box::new(CapturingTransport { received: r, audio_tx_slot: a }));
        (Self { received, audio_tx_slot }, factory)
    }

    fn received_payloads(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }

    async fn push_ai_audio(&self, bytes: &[u8]) {
        let tx = self.audio_tx_slot.lock().unwrap().clone().expect("transport not connected yet");
        tx.send(Bytes::copy_from_slice(bytes)).await.unwrap();
    }
}

fn test_config(tmp_name: &str) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.port_min = 0;
    cfg.port_max = 0; // overwritten per-test below via PortPool range fields
    cfg.recordings_root = std::env::temp_dir().join(format!("engine_scenarios_{}_{}", std::process::id(), tmp_name));
    cfg.jitter_buffer_default_ms = 60;
    cfg.rtcp_interval_secs = 1;
    cfg.stop_timeout_ms = 500;
    cfg
}

fn port_range(base: u16) -> (u16, u16) {
    (base, base + 40)
}

fn encode_pcma_packet(sequence: u16, timestamp: u32, ssrc: u32, payload: &[u8]) -> Bytes {
    let header = RtpHeader::new(CodecDescriptor::pcma().payload_type, sequence, timestamp, ssrc);
    RtpPacket::new(header, payload.to_vec()).to_bytes()
}

async fn send_from(socket: &UdpSocket, target: SocketAddr, bytes: &Bytes) {
    socket.send_to(bytes, target).await.unwrap();
}

/// S1 — latch-and-echo: the scheduler primes the configured remote before
/// any real packet has arrived, and the engine re-targets to whatever
/// source actually sends first.
#[tokio::test]
async fn s1_latch_and_echo() {
    let mut config = test_config("s1");
    let (min, max) = port_range(31200);
    config.port_min = min;
    config.port_max = max;

    let signaled_peer = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    let signaled_addr = signaled_peer.local_addr().unwrap();
    let actual_peer = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    let actual_addr = actual_peer.local_addr().unwrap();

    let manager = SessionManager::new(config);
    let (harness, factory) = Harness::new();
    let (hangup_tx, _hangup_rx) = mpsc::channel(1);

    let handle = manager
        .create_session(CreateSessionRequest {
            session_id: "s1".into(),
            local_rtp_port_hint: None,
            remote_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            remote_port: signaled_addr.port(),
            codec: CodecDescriptor::pcma(),
            caller_id: "s1-caller".into(),
            recording_enabled: false,
            transport_factory: factory,
            on_hangup_request: hangup_tx,
        })
        .await
        .unwrap();

    // Priming burst (3 packets) lands on the signaled endpoint before any
    // real traffic has been seen.
    let mut buf = [0u8; 256];
    for _ in 0..3 {
        let (len, _) = tokio::time::timeout(Duration::from_millis(200), signaled_peer.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[12..len], &vec![0xD5u8; 160][..]);
    }

    let session_addr: SocketAddr = format!("127.0.0.1:{}", handle.local_rtp_port()).parse().unwrap();
    let payload = vec![0x11u8; 160];
    let packet = encode_pcma_packet(100, 1000, 0xCAFE, &payload);
    send_from(&actual_peer, session_addr, &packet).await;

    sleep(Duration::from_millis(100)).await;
    let received = harness.received_payloads();
    assert!(received.iter().any(|p| p.as_ref() == &payload[..]), "inbound payload should reach the upstream transport");

    // Having latched onto the real source, outbound packets now target it
    // instead of the originally signaled endpoint.
    let (len, from) = tokio::time::timeout(Duration::from_millis(200), actual_peer.recv_from(&mut buf)).await.unwrap().unwrap();
    assert_eq!(from, session_addr);
    assert!(len >= 12);
    let _ = actual_addr;

    handle.stop().await;
}

/// S2 — loss concealment: a single missing sequence number in an otherwise
/// in-order run is concealed with silence rather than stalling everything
/// behind it.
#[tokio::test]
async fn s2_loss_concealment() {
    let mut config = test_config("s2");
    let (min, max) = port_range(31300);
    config.port_min = min;
    config.port_max = max;
    config.jitter_buffer_default_ms = 60;

    let peer = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let manager = SessionManager::new(config);
    let (harness, factory) = Harness::new();
    let (hangup_tx, _hangup_rx) = mpsc::channel(1);

    let handle = manager
        .create_session(CreateSessionRequest {
            session_id: "s2".into(),
            local_rtp_port_hint: None,
            remote_address: IpAddr::V4(peer_addr.ip().to_string().parse().unwrap()),
            remote_port: peer_addr.port(),
            codec: CodecDescriptor::pcma(),
            caller_id: "s2-caller".into(),
            recording_enabled: false,
            transport_factory: factory,
            on_hangup_request: hangup_tx,
        })
        .await
        .unwrap();
    let session_addr: SocketAddr = format!("127.0.0.1:{}", handle.local_rtp_port()).parse().unwrap();

    for (seq, ts, tag) in [(200u16, 32000u32, 0xA0u8), (201, 32160, 0xA1), (203, 32480, 0xA3), (204, 32640, 0xA4)] {
        let packet = encode_pcma_packet(seq, ts, 0xFACE, &vec![tag; 160]);
        send_from(&peer, session_addr, &packet).await;
        sleep(Duration::from_millis(20)).await;
    }

    // Give the jitter buffer's timeout for the missing seq 202 time to fire.
    sleep(Duration::from_millis(150)).await;

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.jitter.received, 4);
    assert_eq!(stats.jitter.lost, 1);

    let received = harness.received_payloads();
    assert_eq!(received.len(), 5); // 4 real frames + 1 concealment
    assert!(received.iter().any(|p| p.as_ref() == &[0xA0u8; 160][..]));
    assert!(received.iter().any(|p| p.as_ref() == &[0xA3u8; 160][..]));

    handle.stop().await;
}

/// S3 — reorder: packets arriving out of sequence are re-sorted before
/// being handed upstream.
#[tokio::test]
async fn s3_reorder() {
    let mut config = test_config("s3");
    let (min, max) = port_range(31400);
    config.port_min = min;
    config.port_max = max;

    let peer = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let manager = SessionManager::new(config);
    let (harness, factory) = Harness::new();
    let (hangup_tx, _hangup_rx) = mpsc::channel(1);

    let handle = manager
        .create_session(CreateSessionRequest {
            session_id: "s3".into(),
            local_rtp_port_hint: None,
            remote_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            remote_port: peer_addr.port(),
            codec: CodecDescriptor::pcma(),
            caller_id: "s3-caller".into(),
            recording_enabled: false,
            transport_factory: factory,
            on_hangup_request: hangup_tx,
        })
        .await
        .unwrap();
    let session_addr: SocketAddr = format!("127.0.0.1:{}", handle.local_rtp_port()).parse().unwrap();

    for (seq, ts, tag) in [(300u16, 48000u32, 0xB0u8), (302, 48320, 0xB2), (301, 48160, 0xB1), (303, 48480, 0xB3)] {
        let packet = encode_pcma_packet(seq, ts, 0xBEEF, &vec![tag; 160]);
        send_from(&peer, session_addr, &packet).await;
        sleep(Duration::from_millis(10)).await;
    }

    sleep(Duration::from_millis(150)).await;

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.jitter.reordered, 1);

    let received = harness.received_payloads();
    let tags: Vec<u8> = received.iter().map(|p| p[0]).collect();
    assert_eq!(tags, vec![0xB0, 0xB1, 0xB2, 0xB3]);

    handle.stop().await;
}

/// S4 — outbound pacing: a large chunk of AI audio gets sliced into
/// strictly 20-ms-spaced RTP packets with monotonically advancing
/// sequence/timestamp fields, falling back to silence once drained.
#[tokio::test]
async fn s4_outbound_pacing() {
    let mut config = test_config("s4");
    let (min, max) = port_range(31500);
    config.port_min = min;
    config.port_max = max;

    let peer = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let manager = SessionManager::new(config);
    let (harness, factory) = Harness::new();
    let (hangup_tx, _hangup_rx) = mpsc::channel(1);

    let handle = manager
        .create_session(CreateSessionRequest {
            session_id: "s4".into(),
            local_rtp_port_hint: None,
            remote_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            remote_port: peer_addr.port(),
            codec: CodecDescriptor::pcma(),
            caller_id: "s4-caller".into(),
            recording_enabled: false,
            transport_factory: factory,
            on_hangup_request: hangup_tx,
        })
        .await
        .unwrap();

    // Drain the 3-packet priming burst first so it doesn't pollute the
    // sequence/timestamp progression we're about to measure.
    let mut buf = [0u8; 256];
    for _ in 0..3 {
        tokio::time::timeout(Duration::from_millis(200), peer.recv_from(&mut buf)).await.unwrap().unwrap();
    }

    harness.push_ai_audio(&vec![0x22u8; 9600]).await;

    let mut sequences = Vec::new();
    let mut timestamps = Vec::new();
    for _ in 0..20 {
        let (len, _) = tokio::time::timeout(Duration::from_millis(500), peer.recv_from(&mut buf)).await.unwrap().unwrap();
        let (header, _) = RtpHeader::from_bytes(&buf[..len]).unwrap();
        sequences.push(header.sequence);
        timestamps.push(header.timestamp);
    }

    for w in sequences.windows(2) {
        assert_eq!(w[1].wrapping_sub(w[0]), 1);
    }
    for w in timestamps.windows(2) {
        assert_eq!(w[1].wrapping_sub(w[0]), 160);
    }

    handle.stop().await;
}

/// S5 — burst-latched recorder: a burst of inbound packets followed by a
/// gap, then a second burst, should all land as distinct non-silent slots
/// on the stereo recording's left channel rather than colliding or being
/// dropped, while the continuously-emitted outbound leg occupies the
/// right channel throughout.
#[tokio::test]
async fn s5_burst_latched_recorder() {
    let mut config = test_config("s5");
    let (min, max) = port_range(31700);
    config.port_min = min;
    config.port_max = max;
    config.burst_window_ms = 100;
    let recordings_root = config.recordings_root.clone();

    let peer = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let manager = SessionManager::new(config);
    let (_harness, factory) = Harness::new();
    let (hangup_tx, _hangup_rx) = mpsc::channel(1);

    let handle = manager
        .create_session(CreateSessionRequest {
            session_id: "s5".into(),
            local_rtp_port_hint: None,
            remote_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            remote_port: peer_addr.port(),
            codec: CodecDescriptor::pcma(),
            caller_id: "s5-caller".into(),
            recording_enabled: true,
            transport_factory: factory,
            on_hangup_request: hangup_tx,
        })
        .await
        .unwrap();
    let session_addr: SocketAddr = format!("127.0.0.1:{}", handle.local_rtp_port()).parse().unwrap();

    // First burst: roughly t=0,20,40ms.
    for (i, seq) in (700u16..703).enumerate() {
        let ts = 96000u32 + i as u32 * 160;
        let packet = encode_pcma_packet(seq, ts, 0x5678, &vec![0x44u8; 160]);
        send_from(&peer, session_addr, &packet).await;
        sleep(Duration::from_millis(20)).await;
    }

    // Gap well past the burst window, then a second burst at ~t=300,320,340ms.
    sleep(Duration::from_millis(260)).await;
    for (i, seq) in (703u16..706).enumerate() {
        let ts = 96000u32 + (i as u32 + 15) * 160;
        let packet = encode_pcma_packet(seq, ts, 0x5678, &vec![0x55u8; 160]);
        send_from(&peer, session_addr, &packet).await;
        sleep(Duration::from_millis(20)).await;
    }

    // Let the outbound scheduler keep pacing and the jitter buffer drain
    // before stopping.
    sleep(Duration::from_millis(150)).await;

    let reason = handle.stop().await;
    assert_eq!(reason, telephony_media_bridge::StopReason::Normal);

    let day_dirs: Vec<_> = std::fs::read_dir(&recordings_root).unwrap().filter_map(|e| e.ok()).collect();
    assert_eq!(day_dirs.len(), 1);
    let call_dirs: Vec<_> = std::fs::read_dir(day_dirs[0].path()).unwrap().filter_map(|e| e.ok()).collect();
    assert_eq!(call_dirs.len(), 1);

    let stereo_path = call_dirs[0].path().join("stereo.wav");
    let reader = hound::WavReader::open(&stereo_path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    assert!(!samples.is_empty(), "stereo.wav should contain at least one mixed slot");

    let left: Vec<i16> = samples.iter().step_by(2).copied().collect();
    let nonzero_left_slots = left.chunks(160).filter(|chunk| chunk.iter().any(|&s| s != 0)).count();
    assert!(
        nonzero_left_slots >= 6,
        "expected both bursts (6 packets) to land as distinct non-silent left-channel slots, got {}",
        nonzero_left_slots
    );

    let right_present = samples.iter().skip(1).step_by(2).count();
    assert!(right_present >= left.len().saturating_sub(1), "right channel should track the continuously-emitted outbound leg");

    let _ = std::fs::remove_dir_all(&recordings_root);
}

/// S6 — stop drains: packets still sitting in the jitter buffer at stop
/// time are flushed to the recording rather than discarded.
#[tokio::test]
async fn s6_stop_drains_buffered_audio() {
    let mut config = test_config("s6");
    let (min, max) = port_range(31600);
    config.port_min = min;
    config.port_max = max;
    let recordings_root = config.recordings_root.clone();

    let peer = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let manager = SessionManager::new(config);
    let (harness, factory) = Harness::new();
    let (hangup_tx, _hangup_rx) = mpsc::channel(1);

    let handle = manager
        .create_session(CreateSessionRequest {
            session_id: "s6".into(),
            local_rtp_port_hint: None,
            remote_address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            remote_port: peer_addr.port(),
            codec: CodecDescriptor::pcma(),
            caller_id: "s6-caller".into(),
            recording_enabled: true,
            transport_factory: factory,
            on_hangup_request: hangup_tx,
        })
        .await
        .unwrap();
    let session_addr: SocketAddr = format!("127.0.0.1:{}", handle.local_rtp_port()).parse().unwrap();

    for seq in 500u16..505 {
        let ts = 64000u32 + (seq as u32 - 500) * 160;
        let packet = encode_pcma_packet(seq, ts, 0x1234, &vec![0x33u8; 160]);
        send_from(&peer, session_addr, &packet).await;
        sleep(Duration::from_millis(20)).await;
    }

    let reason = handle.stop().await;
    assert_eq!(reason, telephony_media_bridge::StopReason::Normal);

    let received = harness.received_payloads();
    assert!(received.len() >= 5, "all 5 packets should have reached upstream by stop, got {}", received.len());

    // metadata.json exists and reports the session as having ended normally.
    let day_dirs: Vec<_> = std::fs::read_dir(&recordings_root).unwrap().filter_map(|e| e.ok()).collect();
    assert_eq!(day_dirs.len(), 1);
    let call_dirs: Vec<_> = std::fs::read_dir(day_dirs[0].path()).unwrap().filter_map(|e| e.ok()).collect();
    assert_eq!(call_dirs.len(), 1);
    let metadata_path = call_dirs[0].path().join("metadata.json");
    let metadata_raw = std::fs::read_to_string(&metadata_path).unwrap();
    assert!(metadata_raw.contains("\"stop_reason\": \"normal\""));

    let inbound_wav = call_dirs[0].path().join("inbound.wav");
    let reader = hound::WavReader::open(&inbound_wav).unwrap();
    assert!(reader.len() > 0, "inbound.wav should contain the drained samples");

    let _ = std::fs::remove_dir_all(&recordings_root);
}
