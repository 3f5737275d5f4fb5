//! Buffer-bounded queue between the upstream AI transport and the outbound
//! media pipeline (§4.8). The only coupling between the two; single-writer
//! (the transport's audio callback), single-reader (the scheduler).

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::warn;

pub struct UpstreamAudioQueue {
    max_buffer: usize,
    frame_size: usize,
    pending: BytesMut,
    ready: VecDeque<Bytes>,
}

impl UpstreamAudioQueue {
    /// `max_buffer` and `frame_size` are both in codec bytes (e.g. 8000 and
    /// 160 for G.711 at 1s / 20ms respectively).
    pub fn new(max_buffer: usize, frame_size: usize) -> Self {
        Self { max_buffer, frame_size, pending: BytesMut::new(), ready: VecDeque::new() }
    }

    /// Appends newly arrived upstream audio, extracting any complete frames,
    /// and enforces the buffer bound by dropping the oldest bytes first.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.len() + self.pending.len() > self.max_buffer {
            let overflow_before_extract = chunk.len() + self.pending.len() - self.max_buffer;
            warn!(overflow_before_extract, "upstream audio queue overflow before frame extraction");
        }
        self.pending.extend_from_slice(chunk);
        self.extract_ready_frames();

        if self.pending.len() > self.max_buffer {
            let drop_count = self.pending.len() - self.max_buffer;
            warn!(drop_count, "dropping oldest buffered upstream bytes on overflow");
            let _ = self.pending.split_to(drop_count);
        }
    }

    fn extract_ready_frames(&mut self) {
        while self.pending.len() >= self.frame_size {
            let frame = self.pending.split_to(self.frame_size).freeze();
            self.ready.push_back(frame);
        }
    }

    /// Pulls one ready codec-sized frame, if any.
    pub fn pop_frame(&mut self) -> Option<Bytes> {
        self.ready.pop_front()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Discards any partial (sub-frame) fragment, called at session end to
    /// avoid ever emitting a corrupt final frame.
    pub fn discard_partial(&mut self) {
        self.pending.clear();
    }
}
