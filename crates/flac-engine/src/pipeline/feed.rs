//! Feed worker: active region → sink, paced by the buffered-ahead estimate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, select};

use crate::double_buffer::DoubleBuffer;
use crate::error::Result;
use crate::sink::AudioSink;

use super::{Epoch, PlaybackCounters, StopToken, lock_buffer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FeedExit {
    /// The end-of-stream region was written; `end_position` is the sample just past it.
    Drained { end_position: u64 },
    Stopped,
}

/// How long to wait for the next region given the buffered-ahead estimate.
///
/// Above `floor` the wait is half the estimate. At or below it the wait is `floor` and the
/// second value reports an underrun.
pub(crate) fn adaptive_wait(buffered_ahead_ms: i64, floor: Duration) -> (Duration, bool) {
    let floor_ms = i64::try_from(floor.as_millis()).unwrap_or(i64::MAX);
    if buffered_ahead_ms > floor_ms {
        (Duration::from_millis((buffered_ahead_ms / 2) as u64), false)
    } else {
        (floor, true)
    }
}

pub(crate) struct FeedWorker {
    buffer: Arc<Mutex<DoubleBuffer>>,
    sink: Arc<dyn AudioSink>,
    ready: Receiver<Epoch>,
    resume: Sender<()>,
    stop: StopToken,
    counters: Arc<PlaybackCounters>,
    sample_rate: u32,
    frame_bytes: usize,
    wait_floor: Duration,
    start_play: bool,
}

impl FeedWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: Arc<Mutex<DoubleBuffer>>,
        sink: Arc<dyn AudioSink>,
        ready: Receiver<Epoch>,
        resume: Sender<()>,
        stop: StopToken,
        counters: Arc<PlaybackCounters>,
        sample_rate: u32,
        wait_floor: Duration,
    ) -> Self {
        let frame_bytes = sink.format().frame_bytes().max(1);
        Self {
            buffer,
            sink,
            ready,
            resume,
            stop,
            counters,
            sample_rate,
            frame_bytes,
            wait_floor,
            start_play: true,
        }
    }

    pub fn run(mut self) -> Result<FeedExit> {
        let mut chunk = Vec::new();
        loop {
            let Some(epoch) = self.wait_for_epoch() else {
                return Ok(FeedExit::Stopped);
            };

            let size = {
                let mut buffer = lock_buffer(&self.buffer);
                buffer.switch_buffers();
                buffer.size()
            };
            let _ = self.resume.try_send(());
            tracing::debug!(bytes = size, end_of_stream = epoch.end_of_stream, "buffers swapped");

            if !self.drain(size, &mut chunk)? {
                return Ok(FeedExit::Stopped);
            }
            if epoch.end_of_stream {
                return Ok(FeedExit::Drained {
                    end_position: self.counters.written_end(),
                });
            }
        }
    }

    /// Wait for the next filled region, sleeping adaptively while the decoder catches up.
    fn wait_for_epoch(&self) -> Option<Epoch> {
        loop {
            match self.ready.try_recv() {
                Ok(epoch) => return Some(epoch),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if self.stop.is_stopped() {
                return None;
            }

            let ahead = self
                .counters
                .buffered_ahead_ms(self.sink.head_position(), self.sample_rate);
            let (wait, underrun) = adaptive_wait(ahead, self.wait_floor);
            // The sink is not playing before the first chunk, so nothing can run dry yet.
            if underrun && !self.start_play {
                let count = self.counters.record_underrun();
                tracing::warn!(buffered_ahead_ms = ahead, underruns = count, "feed underrun");
            }

            select! {
                recv(self.ready) -> msg => return msg.ok(),
                recv(self.stop.signal()) -> _ => return None,
                default(wait) => {}
            }
        }
    }

    /// Write the active region to the sink in sink-buffer-sized chunks.
    ///
    /// Returns `false` when cancelled or when the sink cut a write short.
    fn drain(&mut self, size: usize, chunk: &mut Vec<u8>) -> Result<bool> {
        let chunk_bytes = (self.sink.buffer_size_in_frames() * self.frame_bytes).max(self.frame_bytes);
        let mut pos = 0;
        while pos < size {
            if self.stop.is_stopped() {
                return Ok(false);
            }
            let end = (pos + chunk_bytes).min(size);
            {
                let buffer = lock_buffer(&self.buffer);
                chunk.clear();
                chunk.extend_from_slice(&buffer.bytes()[pos..end]);
            }

            let written = self.sink.write(chunk)?;
            self.counters.add_buffered((written / self.frame_bytes) as u64);
            if self.start_play {
                self.start_play = false;
                self.sink.play();
                tracing::debug!("sink playback started");
            }
            if written < chunk.len() {
                return Ok(false);
            }
            pos = end;
        }
        Ok(true)
    }
}
