//! Thread-safe bounded queue of interleaved `f32` samples.
//!
//! This is the handoff inside the CPAL sink:
//! - the feed worker pushes converted PCM with a blocking write
//! - the CPAL callback drains it without blocking
//!
//! Blocking pushes can be interrupted (pause/stop/flush) so a writer never outlives the
//! transport command that made its data irrelevant.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Bounded sample queue with interruptible blocking pushes.
///
/// ## Design
/// - Single [`Condvar`] used as a general "state changed" signal.
/// - An interrupt counter stored under the same mutex as the queue; a push returns early once
///   the counter moves past the value it observed on entry.
/// - Pops only ever return whole frames.
pub struct PcmQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_samples: usize,
}

struct QueueInner {
    queue: VecDeque<f32>,
    interrupts: u64,
}

impl PcmQueue {
    /// Create a queue holding at most `max_samples` samples (not frames).
    pub fn new(channels: usize, max_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(QueueInner {
                queue: VecDeque::with_capacity(max_samples),
                interrupts: 0,
            }),
            cv: Condvar::new(),
            max_samples: max_samples.max(channels),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Capacity in frames.
    pub fn max_frames(&self) -> usize {
        self.max_samples / self.channels
    }

    /// Currently queued frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns the number of samples accepted. This is less than `samples.len()` only when
    /// [`PcmQueue::interrupt`] was called while waiting for room.
    pub fn push_blocking(&self, samples: &[f32]) -> usize {
        let mut g = self.lock();
        let epoch = g.interrupts;
        let mut offset = 0;

        while offset < samples.len() {
            while g.queue.len() >= self.max_samples && g.interrupts == epoch {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.interrupts != epoch {
                break;
            }

            let room = self.max_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;
            self.cv.notify_all();
        }

        offset
    }

    /// Move up to `out.len()` samples (rounded down to whole frames) into `out`.
    ///
    /// Never blocks on the condition variable; returns the number of samples written.
    pub fn pop_into(&self, out: &mut [f32]) -> usize {
        let mut g = self.lock();
        let available = g.queue.len().min(out.len());
        let take = available - available % self.channels;
        for (dst, src) in out.iter_mut().zip(g.queue.drain(..take)) {
            *dst = src;
        }
        drop(g);
        if take > 0 {
            self.cv.notify_all();
        }
        take
    }

    /// Drop everything queued and release blocked writers.
    pub fn clear(&self) {
        let mut g = self.lock();
        g.queue.clear();
        g.interrupts += 1;
        drop(g);
        self.cv.notify_all();
    }

    /// Release blocked writers without dropping queued data.
    pub fn interrupt(&self) {
        let mut g = self.lock();
        g.interrupts += 1;
        drop(g);
        self.cv.notify_all();
    }
}
