//! Shared RTP/RTCP port-pair allocator (§5 "the RTP port pool is shared
//! across sessions and MUST be protected by a mutex or equivalent").

use tokio::sync::Mutex;

use crate::error::EngineError;

struct PortPoolState {
    port_min: u16,
    port_max: u16,
    in_use: std::collections::HashSet<u16>,
    next_candidate: u16,
}

/// Allocates adjacent (rtp, rtcp) port pairs out of a configured range,
/// stepping by 2 so RTP always lands on an even port per RFC 3551 convention.
pub struct PortPool {
    state: Mutex<PortPoolState>,
}

impl PortPool {
    pub fn new(port_min: u16, port_max: u16) -> Self {
        let port_min = port_min + (port_min % 2); // round up to even
        Self {
            state: Mutex::new(PortPoolState {
                port_min,
                port_max,
                in_use: std::collections::HashSet::new(),
                next_candidate: port_min,
            }),
        }
    }

    /// Allocates the next free (rtp_port, rtcp_port) pair. Returns
    /// `PortAllocationFailure` when the range is exhausted.
    pub async fn allocate(&self) -> Result<(u16, u16), EngineError> {
        let mut state = self.state.lock().await;
        let span = (state.port_max - state.port_min) / 2;
        for _ in 0..=span {
            let candidate = state.next_candidate;
            state.next_candidate = if candidate + 2 >= state.port_max {
                state.port_min
            } else {
                candidate + 2
            };
            if !state.in_use.contains(&candidate) {
                state.in_use.insert(candidate);
                return Ok((candidate, candidate + 1));
            }
        }
        Err(EngineError::PortAllocationFailure)
    }

    pub async fn release(&self, rtp_port: u16) {
        self.state.lock().await.in_use.remove(&rtp_port);
    }

    #[cfg(test)]
    pub async fn in_use_count(&self) -> usize {
        self.state.lock().await.in_use.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_distinct_even_ports() {
        let pool = PortPool::new(20000, 20010);
        let (a, a_rtcp) = pool.allocate().await.unwrap();
        let (b, b_rtcp) = pool.allocate().await.unwrap();
        assert_eq!(a % 2, 0);
        assert_eq!(a_rtcp, a + 1);
        assert_ne!(a, b);
        assert_eq!(b_rtcp, b + 1);
    }

    #[tokio::test]
    async fn release_allows_reuse() {
        let pool = PortPool::new(20000, 20004); // only 20000, 20002 available
        let (p1, _) = pool.allocate().await.unwrap();
        let (_p2, _) = pool.allocate().await.unwrap();
        assert!(pool.allocate().await.is_err());

        pool.release(p1).await;
        assert!(pool.allocate().await.is_ok());
    }

    #[tokio::test]
    async fn exhaustion_surfaces_port_allocation_failure() {
        let pool = PortPool::new(20000, 20002);
        let _ = pool.allocate().await.unwrap();
        assert!(matches!(pool.allocate().await, Err(EngineError::PortAllocationFailure)));
    }
}
