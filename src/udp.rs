//! Bound UDP pair for one call's media: RTP on the allocated port, RTCP on
//! `rtp_port + 1` (§4.3). Binding itself is a thin wrapper over
//! `tokio::net::UdpSocket`; the NAT-traversal/latching policy lives in
//! `endpoint::LatchingEndpoint`, not here.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::EngineError;

/// Sockets are held behind `Arc` so a datagram-reading task can hold its own
/// clone independent of `CallSession`'s borrow — letting the session's
/// `select!` loop reference a receiver channel from that task instead of the
/// socket directly.
pub struct UdpEndpoint {
    rtp_socket: Arc<UdpSocket>,
    rtcp_socket: Arc<UdpSocket>,
    rtp_port: u16,
}

impl UdpEndpoint {
    pub async fn bind(rtp_port: u16) -> Result<Self, EngineError> {
        let rtp_socket = Arc::new(UdpSocket::bind(("0.0.0.0", rtp_port)).await?);
        let rtcp_socket = Arc::new(UdpSocket::bind(("0.0.0.0", rtp_port + 1)).await?);
        Ok(Self { rtp_socket, rtcp_socket, rtp_port })
    }

    pub fn rtp_port(&self) -> u16 {
        self.rtp_port
    }

    pub fn rtcp_port(&self) -> u16 {
        self.rtp_port + 1
    }

    /// An owned handle to the RTP socket, independent of `self`'s lifetime —
    /// used to spawn a dedicated reader task.
    pub fn rtp_socket(&self) -> Arc<UdpSocket> {
        self.rtp_socket.clone()
    }

    pub fn rtcp_socket(&self) -> Arc<UdpSocket> {
        self.rtcp_socket.clone()
    }
}
