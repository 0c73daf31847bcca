//! Session status snapshots.

use std::fmt;
use std::path::PathBuf;

use crate::session::PlaybackState;

/// Buffer health of the running pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferInfo {
    /// Milliseconds written to the sink but not played yet. Negative while the sink is starved.
    pub buffered_ahead_ms: i64,
    /// Feed underruns since playback last started.
    pub underruns: u64,
}

impl fmt::Display for BufferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Buffered ahead: {}ms, underruns: {}",
            self.buffered_ahead_ms, self.underruns
        )
    }
}

/// Point-in-time view of a [`crate::PlaybackSession`].
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub state: PlaybackState,
    pub data_source: Option<PathBuf>,
    pub position_ms: u64,
    pub duration_ms: u64,
    /// Source sample rate in Hz; `0` without a source.
    pub sample_rate: u32,
    /// Sink sample rate in Hz; `0` without a sink.
    pub playback_rate: u32,
    pub channels: u16,
    /// Source depth label (`16bit`, `24bit`, ...).
    pub bits_per_sample: &'static str,
    /// Sink encoding label (`16bit`, `float`, ...).
    pub playback_bits_per_sample: &'static str,
    pub is_playing: bool,
    pub volume: f32,
    pub buffer: BufferInfo,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            data_source: None,
            position_ms: 0,
            duration_ms: 0,
            sample_rate: 0,
            playback_rate: 0,
            channels: 0,
            bits_per_sample: "Unknown",
            playback_bits_per_sample: "Unknown",
            is_playing: false,
            volume: 1.0,
            buffer: BufferInfo::default(),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self
            .data_source
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{:?} {} {}/{} ms | {} Hz {}ch {} -> {} | vol {:.2} | {}",
            self.state,
            source,
            self.position_ms,
            self.duration_ms,
            self.sample_rate,
            self.channels,
            self.bits_per_sample,
            self.playback_bits_per_sample,
            self.volume,
            self.buffer
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_info_reads_like_a_status_line() {
        let info = BufferInfo {
            buffered_ahead_ms: 1_250,
            underruns: 2,
        };
        assert_eq!(info.to_string(), "Buffered ahead: 1250ms, underruns: 2");
    }

    #[test]
    fn default_status_is_idle_and_unknown() {
        let status = SessionStatus::default();
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(status.bits_per_sample, "Unknown");
        assert!(!status.is_playing);
    }

    #[test]
    fn status_line_includes_position_and_buffer() {
        let status = SessionStatus {
            state: PlaybackState::Decoding,
            data_source: Some(PathBuf::from("a.flac")),
            position_ms: 1_500,
            duration_ms: 10_000,
            sample_rate: 44_100,
            playback_rate: 44_100,
            channels: 2,
            bits_per_sample: "24bit",
            playback_bits_per_sample: "float",
            is_playing: true,
            volume: 1.0,
            buffer: BufferInfo {
                buffered_ahead_ms: 300,
                underruns: 0,
            },
        };
        let line = status.to_string();
        assert!(line.starts_with("Decoding a.flac 1500/10000 ms"));
        assert!(line.contains("24bit -> float"));
        assert!(line.ends_with("Buffered ahead: 300ms, underruns: 0"));
    }
}
