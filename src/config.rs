//! Engine-wide configuration: the "environment surface for implementers"
//! this spec calls out (port range, jitter-buffer default, recordings root,
//! burst window, drift guard), loaded from the environment the way this
//! codebase's other configs (SIP trunk, storage) load theirs.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port_min: u16,
    pub port_max: u16,
    pub jitter_buffer_default_ms: u32,
    pub recordings_root: PathBuf,
    pub burst_window_ms: u32,
    pub drift_guard_ms: u32,
    pub rtcp_interval_secs: u64,
    pub stop_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port_min: 20000,
            port_max: 30000,
            jitter_buffer_default_ms: 60,
            recordings_root: PathBuf::from("./recordings"),
            burst_window_ms: 100,
            drift_guard_ms: 200,
            rtcp_interval_secs: 5,
            stop_timeout_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let port_min = std::env::var("RTP_PORT_MIN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port_min);

        let port_max = std::env::var("RTP_PORT_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port_max);

        let jitter_buffer_default_ms = std::env::var("JITTER_BUFFER_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.jitter_buffer_default_ms);

        let recordings_root = std::env::var("RECORDINGS_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.recordings_root);

        let burst_window_ms = std::env::var("BURST_WINDOW_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.burst_window_ms);

        let drift_guard_ms = std::env::var("DRIFT_GUARD_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.drift_guard_ms);

        let rtcp_interval_secs = std::env::var("RTCP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rtcp_interval_secs);

        let stop_timeout_ms = std::env::var("STOP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.stop_timeout_ms);

        let config = Self {
            port_min,
            port_max,
            jitter_buffer_default_ms,
            recordings_root,
            burst_window_ms,
            drift_guard_ms,
            rtcp_interval_secs,
            stop_timeout_ms,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.port_min >= self.port_max {
            return Err("RTP port range is invalid".to_string());
        }
        if !(20..=200).contains(&self.jitter_buffer_default_ms) {
            return Err("jitter buffer default must be between 20 and 200 ms".to_string());
        }
        Ok(())
    }
}
