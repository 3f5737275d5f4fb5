//! Per-call artifact directory layout (§3 "Call artifact directory", §6
//! "Persisted state layout"): `<recordings-root>/<YYYY-MM-DD>/call-<epoch-ms>-<caller-id>/`
//! holding the three WAVs, `metadata.json`, and an optional `transcript.txt`.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::CodecName;
use crate::error::{EngineError, StopReason};
use crate::stats::SessionStats;

pub struct CallArtifactDir {
    root: PathBuf,
}

impl CallArtifactDir {
    /// Creates the directory for one call, named from its start time (as
    /// Unix epoch milliseconds) and caller id.
    pub fn create(recordings_root: &Path, call_start: DateTime<Utc>, caller_id: &str) -> Result<Self, EngineError> {
        let day = call_start.format("%Y-%m-%d");
        let epoch_ms = call_start.timestamp_millis();
        let sanitized_caller = sanitize_path_component(caller_id);
        let root = recordings_root.join(day.to_string()).join(format!("call-{epoch_ms}-{sanitized_caller}"));
        std::fs::create_dir_all(&root).map_err(|e| EngineError::RecorderIoError(e.to_string()))?;
        Ok(Self { root })
    }

    pub fn inbound_wav(&self) -> PathBuf {
        self.root.join("inbound.wav")
    }

    pub fn outbound_wav(&self) -> PathBuf {
        self.root.join("outbound.wav")
    }

    pub fn stereo_wav(&self) -> PathBuf {
        self.root.join("stereo.wav")
    }

    pub fn metadata_json(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    pub fn transcript_txt(&self) -> PathBuf {
        self.root.join("transcript.txt")
    }
}

/// Rejects path traversal and separators in a caller id before it becomes
/// part of a directory name.
fn sanitize_path_component(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '+').collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMetadata {
    pub session_id: String,
    pub caller_id: String,
    pub codec: String,
    pub recording_enabled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub jitter_received: u64,
    pub jitter_reordered: u64,
    pub jitter_lost: u64,
    pub jitter_duplicate: u64,
}

impl CallMetadata {
    pub fn new(session_id: String, caller_id: String, codec: CodecName, recording_enabled: bool, start_time: DateTime<Utc>) -> Self {
        Self {
            session_id,
            caller_id,
            codec: codec.sdp_name().to_string(),
            recording_enabled,
            start_time,
            end_time: None,
            stop_reason: None,
            packets_sent: 0,
            bytes_sent: 0,
            packets_received: 0,
            bytes_received: 0,
            jitter_received: 0,
            jitter_reordered: 0,
            jitter_lost: 0,
            jitter_duplicate: 0,
        }
    }

    pub fn finalize(&mut self, end_time: DateTime<Utc>, reason: StopReason, stats: SessionStats) {
        self.end_time = Some(end_time);
        self.stop_reason = Some(reason.to_string());
        self.packets_sent = stats.packets_sent;
        self.bytes_sent = stats.bytes_sent;
        self.packets_received = stats.packets_received;
        self.bytes_received = stats.bytes_received;
        self.jitter_received = stats.jitter.received;
        self.jitter_reordered = stats.jitter.reordered;
        self.jitter_lost = stats.jitter.lost;
        self.jitter_duplicate = stats.jitter.duplicate;
    }

    pub fn write_to(&self, path: &Path) -> Result<(), EngineError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| EngineError::RecorderIoError(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| EngineError::RecorderIoError(e.to_string()))
    }
}

/// Speaker tag for a transcript line (§6: "`[HH:MM:SS] SPEAKER: text`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Caller,
    Ai,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Caller => write!(f, "CALLER"),
            Speaker::Ai => write!(f, "AI"),
        }
    }
}

pub struct TranscriptWriter {
    file: std::fs::File,
}

impl TranscriptWriter {
    pub fn create(path: &Path) -> Result<Self, EngineError> {
        let file = std::fs::File::create(path).map_err(|e| EngineError::RecorderIoError(e.to_string()))?;
        Ok(Self { file })
    }

    pub fn append(&mut self, at: DateTime<Utc>, speaker: Speaker, text: &str) -> Result<(), EngineError> {
        let line = format!("[{}] {}: {}\n", at.format("%H:%M:%S"), speaker, text);
        self.file.write_all(line.as_bytes()).map_err(|e| EngineError::RecorderIoError(e.to_string()))
    }
}
