//! In-memory frame sources and sinks for engine tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::error::{PlayerError, Result};
use crate::sink::{AudioOutput, AudioSink, ChannelMask, Encoding, SinkEvent, SinkFormat};
use crate::source::{FrameSource, SourceOpener, StreamInfo};

/// Interleaved 16-bit little-endian ramp; every sample of a frame carries the frame index.
pub fn pcm16_ramp(frames: usize, channels: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|i| {
            let v = (i as i16).wrapping_mul(3);
            std::iter::repeat_n(v, channels)
        })
        .flat_map(i16::to_le_bytes)
        .collect()
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// A frame source over a PCM byte vector, cut into fixed-size frames.
pub struct VecSource {
    info: StreamInfo,
    pcm: Vec<u8>,
    frame_samples: u64,
    frame_bytes: usize,
    pos: usize,
    block: Vec<u8>,
    blocks_read: usize,
    fail_at: Option<usize>,
    stall: Option<(usize, Duration)>,
    eof: bool,
}

impl VecSource {
    /// `frame_samples` is the number of sample frames per decoded block.
    pub fn new(sample_rate: u32, channels: u16, bits: u32, pcm: Vec<u8>, frame_samples: u64) -> Self {
        let frame_bytes = usize::from(channels) * (bits as usize).div_ceil(8);
        let total_samples = (pcm.len() / frame_bytes) as u64;
        Self {
            info: StreamInfo {
                sample_rate,
                channels,
                bits_per_sample: bits,
                total_samples,
            },
            pcm,
            frame_samples: frame_samples.max(1),
            frame_bytes,
            pos: 0,
            block: Vec::new(),
            blocks_read: 0,
            fail_at: None,
            stall: None,
            eof: false,
        }
    }

    /// Fail with an I/O error on the `k`-th block read (zero based).
    pub fn fail_at_frame(mut self, k: usize) -> Self {
        self.fail_at = Some(k);
        self
    }

    /// Sleep `delay` before every block read from the `k`-th on (zero based, counted across seeks).
    pub fn stall_from_block(mut self, k: usize, delay: Duration) -> Self {
        self.stall = Some((k, delay));
        self
    }

    /// Override the header's sample count.
    pub fn with_total_samples(mut self, total: u64) -> Self {
        self.info.total_samples = total;
        self
    }
}

impl FrameSource for VecSource {
    fn stream_info(&self) -> StreamInfo {
        self.info
    }

    fn seek(&mut self, sample: u64) -> Result<u64> {
        let start = sample / self.frame_samples * self.frame_samples;
        self.pos = (start as usize * self.frame_bytes).min(self.pcm.len());
        self.eof = self.pos >= self.pcm.len();
        Ok(start.min((self.pcm.len() / self.frame_bytes) as u64))
    }

    fn next_block(&mut self) -> Result<Option<&[u8]>> {
        if self.fail_at == Some(self.blocks_read) {
            self.blocks_read += 1;
            return Err(PlayerError::DecodeIo(io::Error::other("corrupt frame")));
        }
        if let Some((k, delay)) = self.stall {
            if self.blocks_read >= k {
                std::thread::sleep(delay);
            }
        }
        if self.pos >= self.pcm.len() {
            self.eof = true;
            return Ok(None);
        }
        let end = (self.pos + self.frame_samples as usize * self.frame_bytes).min(self.pcm.len());
        self.block.clear();
        self.block.extend_from_slice(&self.pcm[self.pos..end]);
        self.pos = end;
        self.blocks_read += 1;
        Ok(Some(&self.block))
    }

    fn is_eof(&self) -> bool {
        self.eof
    }
}

type SourceFactory = Arc<dyn Fn() -> VecSource + Send + Sync>;

/// Opens [`VecSource`]s registered by path; unknown paths fail like a missing file.
#[derive(Default)]
pub struct VecOpener {
    sources: HashMap<PathBuf, SourceFactory>,
}

impl VecOpener {
    pub fn with(mut self, path: &str, make: impl Fn() -> VecSource + Send + Sync + 'static) -> Self {
        self.sources.insert(PathBuf::from(path), Arc::new(make));
        self
    }
}

impl SourceOpener for VecOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        match self.sources.get(path) {
            Some(make) => Ok(Box::new(make())),
            None => Err(PlayerError::SourceOpen {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such source"),
            }),
        }
    }
}

/// How a [`MemorySink`] consumes queued frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Clock {
    /// Everything queued plays immediately while playing; writes never block.
    Instant,
    /// Frames play only through [`MemorySink::advance`]; writes block when the sink is full.
    Manual,
}

struct SinkState {
    written: Vec<u8>,
    since_flush: Vec<u8>,
    queued: u64,
    playing: bool,
    head: u64,
    marker: Option<u64>,
    volume: f32,
    interrupts: u64,
}

/// Sink recording every accepted byte.
pub struct MemorySink {
    format: SinkFormat,
    clock: Clock,
    state: Mutex<SinkState>,
    cv: Condvar,
    events: Sender<SinkEvent>,
}

impl MemorySink {
    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn capacity_frames(&self) -> u64 {
        self.format.buffer_size_in_frames().max(1) as u64
    }

    fn consume(&self, st: &mut SinkState, frames: u64) -> u64 {
        if !st.playing {
            return 0;
        }
        let n = frames.min(st.queued);
        st.queued -= n;
        st.head += n;
        if let Some(marker) = st.marker {
            if st.head >= marker {
                st.marker = None;
                let _ = self.events.try_send(SinkEvent::MarkerReached);
            }
        }
        self.cv.notify_all();
        n
    }

    /// Play up to `frames` queued frames; returns how many played.
    pub fn advance(&self, frames: u64) -> u64 {
        let mut st = self.lock();
        self.consume(&mut st, frames)
    }

    /// Every byte accepted so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Bytes accepted since the last flush or stop.
    pub fn written_since_flush(&self) -> Vec<u8> {
        self.lock().since_flush.clone()
    }

    pub fn queued_frames(&self) -> u64 {
        self.lock().queued
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    fn interrupt(&self, st: &mut SinkState) {
        st.interrupts += 1;
        self.cv.notify_all();
    }
}

impl AudioSink for MemorySink {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn write(&self, bytes: &[u8]) -> Result<usize> {
        let frame_bytes = self.format.frame_bytes();
        let frames = (bytes.len() / frame_bytes) as u64;
        let mut st = self.lock();
        let epoch = st.interrupts;

        let accepted = match self.clock {
            Clock::Instant => {
                st.queued += frames;
                frames
            }
            Clock::Manual => {
                let cap = self.capacity_frames();
                let mut accepted = 0;
                while accepted < frames {
                    while st.queued >= cap && st.interrupts == epoch {
                        st = self.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
                    }
                    if st.interrupts != epoch {
                        break;
                    }
                    let take = (cap - st.queued).min(frames - accepted);
                    st.queued += take;
                    accepted += take;
                }
                accepted
            }
        };

        let len = accepted as usize * frame_bytes;
        st.written.extend_from_slice(&bytes[..len]);
        st.since_flush.extend_from_slice(&bytes[..len]);
        if self.clock == Clock::Instant {
            self.consume(&mut st, u64::MAX);
        }
        Ok(len)
    }

    fn play(&self) {
        let mut st = self.lock();
        st.playing = true;
        if self.clock == Clock::Instant {
            self.consume(&mut st, u64::MAX);
        }
    }

    fn pause(&self) {
        let mut st = self.lock();
        st.playing = false;
        self.interrupt(&mut st);
    }

    fn stop(&self) {
        let mut st = self.lock();
        st.playing = false;
        st.queued = 0;
        st.since_flush.clear();
        self.interrupt(&mut st);
    }

    fn flush(&self) {
        let mut st = self.lock();
        st.queued = 0;
        st.since_flush.clear();
        self.interrupt(&mut st);
    }

    fn is_playing(&self) -> bool {
        self.lock().playing
    }

    fn set_volume(&self, gain: f32) {
        self.lock().volume = gain;
    }

    fn head_position(&self) -> u64 {
        self.lock().head
    }

    fn set_head_position(&self, frames: u64) {
        self.lock().head = frames;
    }

    fn set_marker_position(&self, frames: u64) {
        self.lock().marker = Some(frames);
    }
}

/// Output handing out [`MemorySink`]s.
pub struct MemoryOutput {
    clock: Clock,
    min_frames: usize,
    last: Mutex<Option<Arc<MemorySink>>>,
}

impl MemoryOutput {
    pub fn instant() -> Self {
        Self {
            clock: Clock::Instant,
            min_frames: 32,
            last: Mutex::new(None),
        }
    }

    pub fn manual() -> Self {
        Self {
            clock: Clock::Manual,
            ..Self::instant()
        }
    }

    /// The most recently configured sink.
    pub fn last_sink(&self) -> Option<Arc<MemorySink>> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AudioOutput for MemoryOutput {
    fn min_buffer_size(&self, _sample_rate: u32, channels: ChannelMask, encoding: Encoding) -> usize {
        self.min_frames * usize::from(channels.count()) * encoding.bytes_per_sample()
    }

    fn configure(&self, format: SinkFormat, events: Sender<SinkEvent>) -> Result<Arc<dyn AudioSink>> {
        let sink = Arc::new(MemorySink {
            format,
            clock: self.clock,
            state: Mutex::new(SinkState {
                written: Vec::new(),
                since_flush: Vec::new(),
                queued: 0,
                playing: false,
                head: 0,
                marker: None,
                volume: 1.0,
                interrupts: 0,
            }),
            cv: Condvar::new(),
            events,
        });
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink.clone());
        Ok(sink)
    }
}
