//! CPAL-backed audio sink.
//!
//! The sink keeps a bounded [`PcmQueue`] of `f32` samples between the feed worker and the
//! real-time callback. The callback:
//! - outputs silence while the sink is not playing, without draining the queue
//! - refills a small local buffer from the queue without blocking
//! - maps the stream's channels onto the device layout and applies the output gain
//! - advances the playback head and fires the one-shot marker
//!
//! `cpal::Stream` is not `Send` on every host, so it lives on a dedicated thread for the
//! lifetime of the sink.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::device;
use crate::error::{PlayerError, Result};
use crate::queue::PcmQueue;
use crate::sink::{AudioOutput, AudioSink, ChannelMask, Encoding, SinkEvent, SinkFormat};

const NO_MARKER: u64 = u64::MAX;

/// Smallest callback-sized buffer we ask for, in frames.
const MIN_BUFFER_FRAMES: u32 = 256;

/// Opens sinks on a CPAL output device.
#[derive(Clone, Debug, Default)]
pub struct CpalOutput {
    device: Option<String>,
}

impl CpalOutput {
    /// `device` selects an output by case-insensitive substring; `None` uses the host default.
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl AudioOutput for CpalOutput {
    fn min_buffer_size(&self, sample_rate: u32, channels: ChannelMask, encoding: Encoding) -> usize {
        // 20 ms, never below one typical callback period.
        let frames = (sample_rate / 50).max(MIN_BUFFER_FRAMES) as usize;
        frames * usize::from(channels.count()) * encoding.bytes_per_sample()
    }

    fn configure(&self, format: SinkFormat, events: Sender<SinkEvent>) -> Result<Arc<dyn AudioSink>> {
        let sink = CpalSink::open(self.device.clone(), format, events)?;
        Ok(Arc::new(sink))
    }
}

struct SinkShared {
    queue: PcmQueue,
    playing: AtomicBool,
    head: AtomicU64,
    marker: AtomicU64,
    gain_bits: AtomicU32,
    underruns: AtomicU64,
    events: Sender<SinkEvent>,
}

impl SinkShared {
    fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    /// Advance the head by `frames` and fire the marker once it is passed.
    fn advance(&self, frames: u64) {
        let head = self.head.fetch_add(frames, Ordering::AcqRel) + frames;
        let marker = self.marker.load(Ordering::Acquire);
        if marker != NO_MARKER
            && head >= marker
            && self
                .marker
                .compare_exchange(marker, NO_MARKER, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            let _ = self.events.try_send(SinkEvent::MarkerReached);
        }
    }
}

/// A sink playing through one CPAL output stream.
pub struct CpalSink {
    format: SinkFormat,
    shared: Arc<SinkShared>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    scratch: Mutex<Vec<f32>>,
}

impl CpalSink {
    /// Open the device and start its stream on a dedicated thread.
    ///
    /// The stream starts out silent; nothing is consumed until [`AudioSink::play`].
    pub fn open(device: Option<String>, format: SinkFormat, events: Sender<SinkEvent>) -> Result<Self> {
        let channels = usize::from(format.channels.count());
        let max_samples = format.buffer_size_in_frames().max(1) * channels;
        let shared = Arc::new(SinkShared {
            queue: PcmQueue::new(channels, max_samples),
            playing: AtomicBool::new(false),
            head: AtomicU64::new(0),
            marker: AtomicU64::new(NO_MARKER),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            underruns: AtomicU64::new(0),
            events,
        });

        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let shared_thread = shared.clone();
        let thread = thread::Builder::new()
            .name("flac-output".into())
            .spawn(move || stream_thread(device, format, shared_thread, ready_tx, shutdown_rx))
            .map_err(|source| PlayerError::Spawn {
                name: "flac-output",
                source,
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(capacity_frames = shared.queue.max_frames(), "sink opened");
            }
            Ok(Err(msg)) => {
                let _ = thread.join();
                return Err(PlayerError::Sink(msg));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(PlayerError::Sink("output thread exited during setup".into()));
            }
        }

        Ok(Self {
            format,
            shared,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            scratch: Mutex::new(Vec::new()),
        })
    }
}

impl AudioSink for CpalSink {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn write(&self, bytes: &[u8]) -> Result<usize> {
        let bytes_per_sample = self.format.encoding.bytes_per_sample();
        let mut scratch = self
            .scratch
            .lock()
            .map_err(|_| PlayerError::Sink("sink scratch poisoned".into()))?;
        pcm_bytes_to_f32(self.format.encoding, bytes, &mut scratch);
        let accepted = self.shared.queue.push_blocking(&scratch);
        Ok(accepted * bytes_per_sample)
    }

    fn play(&self) {
        self.shared.playing.store(true, Ordering::Release);
    }

    fn pause(&self) {
        self.shared.playing.store(false, Ordering::Release);
        self.shared.queue.interrupt();
    }

    fn stop(&self) {
        self.shared.playing.store(false, Ordering::Release);
        self.shared.queue.clear();
    }

    fn flush(&self) {
        self.shared.queue.clear();
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    fn set_volume(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.max(0.0) } else { 1.0 };
        self.shared.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    fn head_position(&self) -> u64 {
        self.shared.head.load(Ordering::Acquire)
    }

    fn set_head_position(&self, frames: u64) {
        self.shared.head.store(frames, Ordering::Release);
    }

    fn set_marker_position(&self, frames: u64) {
        self.shared.marker.store(frames, Ordering::Release);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shared.playing.store(false, Ordering::Release);
        let dropped_frames = self.shared.queue.len_frames();
        self.shared.queue.clear();
        self.shutdown.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        let underruns = self.shared.underruns.load(Ordering::Relaxed);
        tracing::debug!(underruns, dropped_frames, "output stream closed");
    }
}

fn stream_thread(
    device: Option<String>,
    format: SinkFormat,
    shared: Arc<SinkShared>,
    ready: Sender<std::result::Result<(), String>>,
    shutdown: Receiver<()>,
) {
    let stream = match build_stream(device.as_deref(), format, shared) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(format!("{e:#}")));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // Returns once the sink drops its sender.
    let _ = shutdown.recv();
    drop(stream);
}

fn build_stream(
    device: Option<&str>,
    format: SinkFormat,
    shared: Arc<SinkShared>,
) -> anyhow::Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device)?;
    let config = device::pick_output_config(&device, format.sample_rate, format.channels.count())?;

    let mut stream_config: cpal::StreamConfig = config.clone().into();
    let max_frames = u32::try_from(format.buffer_size_in_frames()).unwrap_or(u32::MAX);
    if let Some(buf) = device::pick_buffer_size(&config, max_frames) {
        stream_config.buffer_size = buf;
    }

    tracing::info!(
        sample_rate = stream_config.sample_rate,
        channels = stream_config.channels,
        sample_format = ?config.sample_format(),
        buffer_size = ?stream_config.buffer_size,
        "output stream"
    );

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_typed::<f32>(&device, &stream_config, shared)?,
        cpal::SampleFormat::I16 => build_typed::<i16>(&device, &stream_config, shared)?,
        cpal::SampleFormat::I32 => build_typed::<i32>(&device, &stream_config, shared)?,
        cpal::SampleFormat::U16 => build_typed::<u16>(&device, &stream_config, shared)?,
        other => anyhow::bail!("Unsupported sample format: {other:?}"),
    };
    stream.play()?;
    Ok(stream)
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<SinkShared>,
) -> anyhow::Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let dst_channels = usize::from(config.channels).max(1);
    let src_channels = shared.queue.channels();
    let mut src: Vec<f32> = Vec::new();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if !shared.playing.load(Ordering::Acquire) {
                data.fill(silence);
                return;
            }

            let frames = data.len() / dst_channels;
            src.resize(frames * src_channels, 0.0);
            let popped = shared.queue.pop_into(&mut src) / src_channels;
            let gain = shared.gain();

            for frame in 0..popped {
                let input = &src[frame * src_channels..(frame + 1) * src_channels];
                for ch in 0..dst_channels {
                    let sample = map_channel(input, dst_channels, ch) * gain;
                    data[frame * dst_channels + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }
            if popped < frames {
                data[popped * dst_channels..].fill(silence);
                shared.underruns.fetch_add(1, Ordering::Relaxed);
            }
            if popped > 0 {
                shared.advance(popped as u64);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Read one output sample for `dst_ch` from a single source frame.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - matching layouts: pass-through
/// - anything else: clamp to the last available source channel
fn map_channel(frame: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    let get = |ch: usize| frame.get(ch).copied().unwrap_or(0.0);
    match (frame.len(), dst_channels) {
        (2, 1) => 0.5 * (get(0) + get(1)),
        (1, _) => get(0),
        (n, _) => get(dst_ch.min(n.saturating_sub(1))),
    }
}

/// Decode little-endian PCM bytes in `encoding` into `f32` samples.
///
/// A trailing partial sample is ignored.
fn pcm_bytes_to_f32(encoding: Encoding, bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    match encoding {
        Encoding::Pcm8 => out.extend(bytes.iter().map(|&b| (f32::from(b) - 128.0) / 128.0)),
        Encoding::Pcm16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32_768.0),
        ),
        Encoding::Float => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let frame = [0.25];
        assert_eq!(map_channel(&frame, 2, 0), 0.25);
        assert_eq!(map_channel(&frame, 2, 1), 0.25);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        assert_eq!(map_channel(&[0.5, -0.25], 1, 0), 0.125);
    }

    #[test]
    fn stereo_passes_through_and_clamps_extra_outputs() {
        let frame = [0.1, 0.2];
        assert_eq!(map_channel(&frame, 2, 0), 0.1);
        assert_eq!(map_channel(&frame, 2, 1), 0.2);
        assert_eq!(map_channel(&frame, 6, 4), 0.2);
    }

    #[test]
    fn pcm16_bytes_scale_to_unit_range() {
        let mut out = Vec::new();
        pcm_bytes_to_f32(Encoding::Pcm16, &[0x00, 0x80, 0x00, 0x00, 0x00, 0x40], &mut out);
        assert_eq!(out, vec![-1.0, 0.0, 0.5]);
    }

    #[test]
    fn pcm8_is_unsigned() {
        let mut out = Vec::new();
        pcm_bytes_to_f32(Encoding::Pcm8, &[0, 128, 192], &mut out);
        assert_eq!(out, vec![-1.0, 0.0, 0.5]);
    }

    #[test]
    fn float_bytes_pass_through() {
        let mut out = Vec::new();
        let bytes: Vec<u8> = [0.75f32, -0.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        pcm_bytes_to_f32(Encoding::Float, &bytes, &mut out);
        assert_eq!(out, vec![0.75, -0.5]);
    }

    #[test]
    fn trailing_partial_sample_is_ignored() {
        let mut out = Vec::new();
        pcm_bytes_to_f32(Encoding::Pcm16, &[0x00, 0x40, 0x7F], &mut out);
        assert_eq!(out, vec![0.5]);
    }

    #[test]
    fn min_buffer_size_covers_twenty_milliseconds() {
        let output = CpalOutput::new(None);
        assert_eq!(
            output.min_buffer_size(48_000, ChannelMask::Stereo, Encoding::Float),
            960 * 8
        );
        assert_eq!(
            output.min_buffer_size(8_000, ChannelMask::Mono, Encoding::Pcm16),
            256 * 2
        );
    }

    #[test]
    fn marker_fires_once_when_head_passes_it() {
        let (tx, rx) = bounded(4);
        let shared = SinkShared {
            queue: PcmQueue::new(1, 16),
            playing: AtomicBool::new(true),
            head: AtomicU64::new(0),
            marker: AtomicU64::new(100),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            underruns: AtomicU64::new(0),
            events: tx,
        };
        shared.advance(60);
        assert!(rx.try_recv().is_err());
        shared.advance(60);
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::MarkerReached);
        shared.advance(60);
        assert!(rx.try_recv().is_err());
        assert_eq!(shared.head.load(Ordering::Relaxed), 180);
    }
}
