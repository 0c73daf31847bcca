//! Frame decoder abstraction.
//!
//! The engine never parses the bitstream itself: a [`FrameSource`] positions itself at a sample
//! index and hands back decoded PCM one frame at a time.

use std::path::Path;

use crate::convert::BitDepth;
use crate::error::Result;

/// Stream parameters read once from the source header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Source bit depth.
    pub bits_per_sample: u32,
    /// Total length in sample frames; `0` when the header does not say.
    pub total_samples: u64,
}

impl StreamInfo {
    pub fn bit_depth(&self) -> BitDepth {
        BitDepth::from_bits(self.bits_per_sample)
    }

    pub fn duration_ms(&self) -> u64 {
        samples_to_ms(self.total_samples, self.sample_rate)
    }
}

/// Convert a sample-frame count to milliseconds, rounding down.
pub fn samples_to_ms(samples: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples.saturating_mul(1000) / u64::from(sample_rate)
}

/// Convert milliseconds to a sample-frame index, rounding down.
pub fn ms_to_samples(ms: u64, sample_rate: u32) -> u64 {
    ms.saturating_mul(u64::from(sample_rate)) / 1000
}

/// An opened, seekable stream of decoded frames.
pub trait FrameSource: Send {
    fn stream_info(&self) -> StreamInfo;

    /// Position the stream at the frame containing `sample`.
    ///
    /// Returns the first sample of that frame, never a sample past `sample`.
    fn seek(&mut self, sample: u64) -> Result<u64>;

    /// Decode the next frame.
    ///
    /// The block holds interleaved little-endian samples at the source bit depth (8-bit samples
    /// unsigned) and stays valid until the next call. `None` marks the end of the stream.
    fn next_block(&mut self) -> Result<Option<&[u8]>>;

    /// Whether the end of the stream has been reached.
    fn is_eof(&self) -> bool;
}

/// Opens a [`FrameSource`] for a path.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}
