//! Decode/feed worker pair for one playback run.
//!
//! A run owns two threads:
//! - `flac-decode` fills the write region of the [`DoubleBuffer`]
//! - `flac-feed` swaps regions and pushes the active one into the sink
//!
//! The only hand-off between them is a capacity-1 "ready" channel (decode → feed) acknowledged
//! by a capacity-1 "resume" channel (feed → decode). Both threads watch the same [`StopToken`].

mod decode;
mod feed;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::double_buffer::DoubleBuffer;
use crate::error::{PlayerError, Result};
use crate::sink::AudioSink;
use crate::source::{FrameSource, samples_to_ms};

use decode::{DecodeExit, DecodeWorker};
use feed::{FeedExit, FeedWorker};

const JOIN_POLL: Duration = Duration::from_millis(10);

/// One filled write region, announced by the decode worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Epoch {
    /// The region holds the tail of the stream; nothing follows it.
    pub end_of_stream: bool,
}

/// Messages from the workers to the session controller.
#[derive(Debug)]
pub(crate) enum WorkerReport {
    /// A worker hit an error; the run is dead.
    Failed { run_id: u64, error: PlayerError },
    /// The feed worker wrote the final region; `end_position` is the sample just past it.
    Drained { run_id: u64, end_position: u64 },
}

/// Requests cancellation of a run.
pub(crate) struct StopHandle {
    flag: Arc<AtomicBool>,
    signal: Option<Sender<()>>,
}

/// Observes cancellation; `signal()` disconnects on stop so it can sit in a `select!`.
#[derive(Clone)]
pub(crate) struct StopToken {
    flag: Arc<AtomicBool>,
    signal: Receiver<()>,
}

impl StopHandle {
    pub fn new() -> (Self, StopToken) {
        let flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(0);
        (
            Self {
                flag: flag.clone(),
                signal: Some(tx),
            },
            StopToken { flag, signal: rx },
        )
    }

    pub fn stop(&mut self) {
        self.flag.store(true, Ordering::Release);
        self.signal.take();
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl StopToken {
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

/// Position bookkeeping shared between the feed worker and the controller.
#[derive(Debug, Default)]
pub(crate) struct PlaybackCounters {
    /// Frames written to the sink since the run started.
    buffered_frames: AtomicU64,
    underruns: AtomicU64,
    /// Sample position the run started from.
    samples_offset: AtomicU64,
}

impl PlaybackCounters {
    /// Reset for a run starting at `offset`.
    pub fn restart(&self, offset: u64) {
        self.buffered_frames.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.samples_offset.store(offset, Ordering::Relaxed);
    }

    /// Move the window to `offset` without touching the underrun count.
    pub fn reposition(&self, offset: u64) {
        self.buffered_frames.store(0, Ordering::Relaxed);
        self.samples_offset.store(offset, Ordering::Relaxed);
    }

    pub fn buffered_frames(&self) -> u64 {
        self.buffered_frames.load(Ordering::Relaxed)
    }

    pub fn add_buffered(&self, frames: u64) {
        self.buffered_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn record_underrun(&self) -> u64 {
        self.underruns.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn samples_offset(&self) -> u64 {
        self.samples_offset.load(Ordering::Relaxed)
    }

    /// Sample position just past the last frame handed to the sink.
    pub fn written_end(&self) -> u64 {
        self.samples_offset() + self.buffered_frames()
    }

    /// Milliseconds of audio written but not yet played, given the sink head.
    pub fn buffered_ahead_ms(&self, head: u64, sample_rate: u32) -> i64 {
        let written = samples_to_ms(self.written_end(), sample_rate) as i64;
        written - samples_to_ms(head, sample_rate) as i64
    }
}

pub(crate) fn lock_buffer(buffer: &Mutex<DoubleBuffer>) -> MutexGuard<'_, DoubleBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a run needs; the source must already be positioned.
pub(crate) struct PipelineParams {
    pub run_id: u64,
    pub source: Box<dyn FrameSource>,
    pub buffer: Arc<Mutex<DoubleBuffer>>,
    pub sink: Arc<dyn AudioSink>,
    pub counters: Arc<PlaybackCounters>,
    pub wait_floor: Duration,
    pub reports: Sender<WorkerReport>,
}

/// Signals the controller that a worker thread is gone, even if it panicked.
struct ExitGuard(Sender<()>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// A running decode/feed pair.
pub(crate) struct Pipeline {
    run_id: u64,
    stop: StopHandle,
    sink: Arc<dyn AudioSink>,
    exits: Receiver<()>,
    decode: Option<JoinHandle<Box<dyn FrameSource>>>,
    feed: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn both workers.
    pub fn start(params: PipelineParams) -> Result<Self> {
        let PipelineParams {
            run_id,
            source,
            buffer,
            sink,
            counters,
            wait_floor,
            reports,
        } = params;

        let (mut stop, token) = StopHandle::new();
        let (ready_tx, ready_rx) = bounded::<Epoch>(1);
        let (resume_tx, resume_rx) = bounded::<()>(1);
        let (exit_tx, exits) = bounded::<()>(2);

        let sample_rate = source.stream_info().sample_rate;
        let decode_worker = DecodeWorker::new(
            source,
            buffer.clone(),
            ready_tx,
            resume_rx,
            token.clone(),
        );
        let feed_worker = FeedWorker::new(
            buffer,
            sink.clone(),
            ready_rx,
            resume_tx,
            token,
            counters,
            sample_rate,
            wait_floor,
        );

        let decode_exit = exit_tx.clone();
        let decode_reports = reports.clone();
        let decode = thread::Builder::new()
            .name("flac-decode".into())
            .spawn(move || {
                let _guard = ExitGuard(decode_exit);
                let (source, result) = decode_worker.run();
                match result {
                    Ok(DecodeExit::EndOfStream) => tracing::debug!(run_id, "decode reached end of stream"),
                    Ok(DecodeExit::Stopped) => tracing::debug!(run_id, "decode stopped"),
                    Err(error) => {
                        tracing::error!(run_id, "decode worker failed: {error}");
                        let _ = decode_reports.send(WorkerReport::Failed { run_id, error });
                    }
                }
                source
            })
            .map_err(|source| PlayerError::Spawn {
                name: "flac-decode",
                source,
            })?;

        let feed = thread::Builder::new()
            .name("flac-feed".into())
            .spawn(move || {
                let _guard = ExitGuard(exit_tx);
                match feed_worker.run() {
                    Ok(FeedExit::Drained { end_position }) => {
                        tracing::debug!(run_id, end_position, "feed drained");
                        let _ = reports.send(WorkerReport::Drained {
                            run_id,
                            end_position,
                        });
                    }
                    Ok(FeedExit::Stopped) => tracing::debug!(run_id, "feed stopped"),
                    Err(error) => {
                        tracing::error!(run_id, "feed worker failed: {error}");
                        let _ = reports.send(WorkerReport::Failed { run_id, error });
                    }
                }
            });
        let feed = match feed {
            Ok(handle) => handle,
            Err(source) => {
                stop.stop();
                let _ = decode.join();
                return Err(PlayerError::Spawn {
                    name: "flac-feed",
                    source,
                });
            }
        };

        tracing::debug!(run_id, "pipeline started");
        Ok(Self {
            run_id,
            stop,
            sink,
            exits,
            decode: Some(decode),
            feed: Some(feed),
        })
    }

    /// Stop both workers and wait up to `timeout` for them to exit.
    ///
    /// The sink is paused repeatedly while waiting so a feed write that started after the first
    /// interrupt is released too. Returns the frame source when the decode worker handed it
    /// back. On timeout the workers are detached and `None` is returned.
    pub fn join(mut self, timeout: Duration) -> Option<Box<dyn FrameSource>> {
        self.stop.stop();
        let deadline = Instant::now() + timeout;
        let mut exited = 0;
        while exited < 2 {
            self.sink.pause();
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.exits.recv_timeout((deadline - now).min(JOIN_POLL)) {
                Ok(()) => exited += 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let all_exited = exited == 2;
        if !all_exited {
            tracing::warn!(run_id = self.run_id, ?timeout, "workers did not exit in time; detaching");
        }

        if let Some(feed) = self.feed.take() {
            if all_exited || feed.is_finished() {
                let _ = feed.join();
            }
        }
        match self.decode.take() {
            Some(decode) if all_exited || decode.is_finished() => decode.join().ok(),
            _ => None,
        }
    }
}
