//! Streaming WAV writer: the header is written up front with its size
//! fields zeroed, then finalized on stop by rewriting bytes at offsets 4
//! and 40, rather than buffering the whole recording in memory the way
//! `hound`'s own writer does internally. Needed so a call of unbounded
//! length doesn't hold its entire recording in RAM.

use std::io::{self, Seek, SeekFrom, Write};

const RIFF_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 40;
const HEADER_LEN: u32 = 44;

/// Writes a canonical 44-byte PCM WAV header with size fields zeroed.
fn write_placeholder_header<W: Write>(w: &mut W, sample_rate: u32, channels: u16, bits_per_sample: u16) -> io::Result<()> {
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);

    w.write_all(b"RIFF")?;
    w.write_all(&0u32.to_le_bytes())?; // RIFF chunk size, fixed up on finalize
    w.write_all(b"WAVE")?;
    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?; // fmt chunk size
    w.write_all(&1u16.to_le_bytes())?; // PCM
    w.write_all(&channels.to_le_bytes())?;
    w.write_all(&sample_rate.to_le_bytes())?;
    w.write_all(&byte_rate.to_le_bytes())?;
    w.write_all(&block_align.to_le_bytes())?;
    w.write_all(&bits_per_sample.to_le_bytes())?;
    w.write_all(b"data")?;
    w.write_all(&0u32.to_le_bytes())?; // data chunk size, fixed up on finalize
    Ok(())
}

pub struct StreamingWavWriter<W> {
    inner: W,
    channels: u16,
    data_bytes_written: u32,
    finalized: bool,
}

impl<W: Write + Seek> StreamingWavWriter<W> {
    pub fn new(mut inner: W, sample_rate: u32, channels: u16, bits_per_sample: u16) -> io::Result<Self> {
        write_placeholder_header(&mut inner, sample_rate, channels, bits_per_sample)?;
        Ok(Self { inner, channels, data_bytes_written: 0, finalized: false })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Appends raw interleaved 16-bit LE PCM sample bytes.
    pub fn write_samples(&mut self, pcm_le_bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(pcm_le_bytes)?;
        self.data_bytes_written = self.data_bytes_written.saturating_add(pcm_le_bytes.len() as u32);
        Ok(())
    }

    /// Rewrites the RIFF and data chunk sizes now that the total length is
    /// known. Idempotent; a second call is a no-op.
    pub fn finalize(&mut self) -> io::Result<()> {
        if self.finalized {
            return Ok(());
        }
        let riff_size = HEADER_LEN - 8 + self.data_bytes_written;
        self.inner.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
        self.inner.write_all(&riff_size.to_le_bytes())?;
        self.inner.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        self.inner.write_all(&self.data_bytes_written.to_le_bytes())?;
        self.inner.flush()?;
        self.finalized = true;
        Ok(())
    }
}
