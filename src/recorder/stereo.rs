//! Builds a synchronized two-channel WAV (left=inbound caller,
//! right=outbound AI) out of two independently-arriving streams (§4.11).
//!
//! Audio lands on a shared 20-ms slot timeline anchored at the call's
//! first observed wall-clock instant. Outbound audio is emitted
//! continuously by the scheduler so it always lands on its exact slot;
//! inbound audio arrives in bursts and may need to hunt forward for an
//! empty slot within a short burst window.

use std::collections::BTreeMap;
use std::io::{Seek, Write};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::EngineError;
use crate::recorder::wav::StreamingWavWriter;

const SLOT_MS: u64 = 20;

pub struct StereoRecorder<W: Write + Seek> {
    call_start: Instant,
    samples_per_slot: usize,
    burst_window: Duration,
    drift_guard_slots: u64,

    left: BTreeMap<u64, Vec<i16>>,
    right: BTreeMap<u64, Vec<i16>>,
    last_inbound_arrival: Option<Instant>,

    outbound_progression_slot: u64,
    next_ready_slot: u64,

    writer: StreamingWavWriter<W>,
}

impl<W: Write + Seek> StereoRecorder<W> {
    pub fn new(
        sink: W,
        call_start: Instant,
        sample_rate: u32,
        samples_per_slot: usize,
        burst_window_ms: u32,
        drift_guard_ms: u32,
    ) -> Result<Self, EngineError> {
        let writer = StreamingWavWriter::new(sink, sample_rate, 2, 16).map_err(|e| EngineError::RecorderIoError(e.to_string()))?;
        Ok(Self {
            call_start,
            samples_per_slot,
            burst_window: Duration::from_millis(burst_window_ms as u64),
            drift_guard_slots: (drift_guard_ms as u64).max(SLOT_MS) / SLOT_MS,
            left: BTreeMap::new(),
            right: BTreeMap::new(),
            last_inbound_arrival: None,
            outbound_progression_slot: 0,
            next_ready_slot: 0,
            writer,
        })
    }

    fn slot_for(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.call_start).as_millis() as u64 / SLOT_MS
    }

    fn max_observed_slot(&self) -> u64 {
        let left_max = self.left.keys().next_back().copied().unwrap_or(0);
        let right_max = self.right.keys().next_back().copied().unwrap_or(0);
        left_max.max(right_max).max(self.outbound_progression_slot)
    }

    fn is_too_stale(&self, slot: u64) -> bool {
        slot + self.drift_guard_slots < self.next_ready_slot
    }

    /// Outbound chunks always land on their exact slot (the scheduler is
    /// continuous, so slots never need hunting).
    pub fn push_outbound(&mut self, slot: u64, pcm: Vec<i16>) -> Result<(), EngineError> {
        self.outbound_progression_slot = self.outbound_progression_slot.max(slot);
        self.right.insert(slot, pcm);
        self.try_emit_ready()
    }

    /// Inbound chunks use their arrival time's slot, hunting forward
    /// within the burst window if that slot is already occupied and the
    /// previous inbound arrival was recent.
    pub fn push_inbound(&mut self, arrival: Instant, pcm: Vec<i16>) -> Result<(), EngineError> {
        let mut slot = self.slot_for(arrival);

        let within_burst = self.last_inbound_arrival.is_some_and(|last| arrival.saturating_duration_since(last) <= self.burst_window);
        if within_burst && self.left.contains_key(&slot) {
            let burst_slots = (self.burst_window.as_millis() as u64 / SLOT_MS).max(1);
            let limit = slot + burst_slots;
            let mut candidate = slot + 1;
            while candidate < limit && self.left.contains_key(&candidate) {
                candidate += 1;
            }
            slot = candidate;
        }

        if self.is_too_stale(slot) {
            warn!(slot, next_ready_slot = self.next_ready_slot, "dropping inbound audio: arrived past the drift guard");
            return Ok(());
        }

        self.left.insert(slot, pcm);
        self.last_inbound_arrival = Some(arrival);
        self.try_emit_ready()
    }

    fn slot_is_ready(&self, slot: u64) -> bool {
        let both_present = self.left.contains_key(&slot) && self.right.contains_key(&slot);
        let far_enough_observed = self.max_observed_slot() >= slot + 3;
        let old_enough = self.outbound_progression_slot >= slot + 2; // >= 40ms behind progression
        both_present || far_enough_observed || old_enough
    }

    fn try_emit_ready(&mut self) -> Result<(), EngineError> {
        while self.slot_is_ready(self.next_ready_slot) {
            let slot = self.next_ready_slot;
            let left = self.left.remove(&slot);
            let right = self.right.remove(&slot);
            if left.is_some() || right.is_some() {
                self.emit_slot(left, right)?;
            }
            self.next_ready_slot += 1;
        }
        Ok(())
    }

    fn emit_slot(&mut self, left: Option<Vec<i16>>, right: Option<Vec<i16>>) -> Result<(), EngineError> {
        let silence = vec![0i16; self.samples_per_slot];
        let left = left.unwrap_or_else(|| silence.clone());
        let right = right.unwrap_or(silence);

        let mut bytes = Vec::with_capacity(self.samples_per_slot * 4);
        for i in 0..self.samples_per_slot {
            let l = left.get(i).copied().unwrap_or(0);
            let r = right.get(i).copied().unwrap_or(0);
            bytes.extend_from_slice(&l.to_le_bytes());
            bytes.extend_from_slice(&r.to_le_bytes());
        }
        self.writer.write_samples(&bytes).map_err(|e| EngineError::RecorderIoError(e.to_string()))
    }

    /// Flushes every remaining buffered slot (with silence for absent
    /// partners) and finalizes the WAV header. Called at session stop.
    pub fn finalize(mut self) -> Result<(), EngineError> {
        let last = self.max_observed_slot();
        while self.next_ready_slot <= last {
            let slot = self.next_ready_slot;
            let left = self.left.remove(&slot);
            let right = self.right.remove(&slot);
            if left.is_some() || right.is_some() {
                self.emit_slot(left, right)?;
            }
            self.next_ready_slot += 1;
        }
        self.writer.finalize().map_err(|e| EngineError::RecorderIoError(e.to_string()))
    }
}
