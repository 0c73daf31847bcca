//! Audio output abstraction.
//!
//! An [`AudioOutput`] configures a sink for one stream format. The resulting [`AudioSink`] is
//! shared between the session (transport control, position queries) and the feed worker
//! (blocking writes), so every method takes `&self`.

use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::error::Result;

/// Output channel layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMask {
    Mono,
    Stereo,
}

impl ChannelMask {
    /// Map a stream channel count; only mono and stereo have an output layout.
    pub fn from_count(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(ChannelMask::Mono),
            2 => Some(ChannelMask::Stereo),
            _ => None,
        }
    }

    pub fn count(self) -> u16 {
        match self {
            ChannelMask::Mono => 1,
            ChannelMask::Stereo => 2,
        }
    }
}

/// PCM encoding accepted by the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Unsigned 8-bit.
    Pcm8,
    /// Signed 16-bit little-endian.
    Pcm16,
    /// 32-bit float little-endian.
    Float,
}

impl Encoding {
    /// Encoding used for a source bit depth.
    pub fn for_bits(bits_per_sample: u32) -> Self {
        if bits_per_sample == 8 {
            Encoding::Pcm8
        } else if bits_per_sample > 16 {
            Encoding::Float
        } else {
            Encoding::Pcm16
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Encoding::Pcm8 => 1,
            Encoding::Pcm16 => 2,
            Encoding::Float => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Encoding::Pcm8 => "8bit",
            Encoding::Pcm16 => "16bit",
            Encoding::Float => "float",
        }
    }
}

/// Format a sink is configured with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: ChannelMask,
    pub encoding: Encoding,
    /// Size of the sink's internal buffer in bytes.
    pub buffer_size_bytes: usize,
}

impl SinkFormat {
    /// Bytes per interleaved sample frame.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels.count()) * self.encoding.bytes_per_sample()
    }

    pub fn buffer_size_in_frames(&self) -> usize {
        self.buffer_size_bytes / self.frame_bytes()
    }
}

/// Notifications raised by a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    /// The playback head reached the position set by [`AudioSink::set_marker_position`].
    MarkerReached,
}

/// A configured PCM output.
pub trait AudioSink: Send + Sync {
    fn format(&self) -> SinkFormat;

    /// Write PCM bytes, blocking until the sink accepted them.
    ///
    /// Returns early with a short count when `pause`, `stop` or `flush` is called meanwhile.
    fn write(&self, bytes: &[u8]) -> Result<usize>;

    fn play(&self);

    /// Stop consuming; queued data is kept.
    fn pause(&self);

    /// Stop consuming and leave the playing state.
    fn stop(&self);

    /// Discard queued data.
    fn flush(&self);

    fn is_playing(&self) -> bool;

    /// Linear gain applied on output.
    fn set_volume(&self, gain: f32);

    /// Sample frames played so far.
    fn head_position(&self) -> u64;

    fn set_head_position(&self, frames: u64);

    fn buffer_size_in_frames(&self) -> usize {
        self.format().buffer_size_in_frames()
    }

    /// Arm a one-shot [`SinkEvent::MarkerReached`] at the given head position.
    fn set_marker_position(&self, frames: u64);
}

/// Factory for sinks on a particular output.
pub trait AudioOutput: Send + Sync {
    /// Smallest workable sink buffer, in bytes, for the given format.
    fn min_buffer_size(&self, sample_rate: u32, channels: ChannelMask, encoding: Encoding) -> usize;

    /// Create a sink; events are delivered on `events`.
    fn configure(&self, format: SinkFormat, events: Sender<SinkEvent>) -> Result<Arc<dyn AudioSink>>;
}
