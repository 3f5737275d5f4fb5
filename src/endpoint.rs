//! Symmetric RTP / comedia latching (§4.3): the session starts sending to a
//! signaled endpoint before it has proof that endpoint can receive, then
//! adopts whatever address the first real packet actually came from.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn to_socket_addr(self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self { address: addr.ip(), port: addr.port() }
    }
}

fn is_obviously_invalid(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4 == Ipv4Addr::new(0, 0, 0, 0) || v4 == Ipv4Addr::BROADCAST,
        IpAddr::V6(v6) => v6.is_unspecified(),
    }
}

/// Tracks the signaled ("expected") remote endpoint and the latched
/// ("actual") one learned from traffic.
#[derive(Debug, Clone)]
pub struct LatchingEndpoint {
    expected: Endpoint,
    actual: Option<Endpoint>,
}

impl LatchingEndpoint {
    pub fn new(expected: Endpoint) -> Self {
        Self { expected, actual: None }
    }

    pub fn expected(&self) -> Endpoint {
        self.expected
    }

    /// The endpoint outbound traffic should currently target: the latched
    /// endpoint once one exists, otherwise the signaled one.
    pub fn current_target(&self) -> Endpoint {
        self.actual.unwrap_or(self.expected)
    }

    pub fn is_latched(&self) -> bool {
        self.actual.is_some()
    }

    /// Evaluates an inbound packet's source against the validation policy
    /// (§4.3) and returns `true` if it's admitted. Admission latches the
    /// endpoint on the first packet, and re-latches on any subsequent
    /// admitted packet from a different source (symmetric RTP / comedia).
    pub fn admit(&mut self, source: Endpoint) -> bool {
        match self.actual {
            None => {
                self.actual = Some(source);
                true
            }
            Some(current) => {
                if is_obviously_invalid(source.address) {
                    return false;
                }
                if source != current {
                    self.actual = Some(source);
                }
                true
            }
        }
    }
}
