//! Per-channel mono WAV writer. Unlike `StereoRecorder` there's no
//! slotting step — frames are appended as they arrive — so the simpler
//! batching `hound` writer is a fine fit here.

use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::EngineError;

pub struct ChannelRecorder {
    writer: WavWriter<BufWriter<std::fs::File>>,
}

impl ChannelRecorder {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, EngineError> {
        let spec = WavSpec { channels: 1, sample_rate, bits_per_sample: 16, sample_format: SampleFormat::Int };
        let writer = WavWriter::create(path, spec).map_err(|e| EngineError::RecorderIoError(e.to_string()))?;
        Ok(Self { writer })
    }

    pub fn write_frame(&mut self, pcm: &[i16]) -> Result<(), EngineError> {
        for &sample in pcm {
            self.writer.write_sample(sample).map_err(|e| EngineError::RecorderIoError(e.to_string()))?;
        }
        Ok(())
    }

    pub fn finalize(self) -> Result<(), EngineError> {
        self.writer.finalize().map_err(|e| EngineError::RecorderIoError(e.to_string()))
    }
}
