use std::time::Duration;

use crate::double_buffer::DEFAULT_CAPACITY;

/// Tuning parameters for a playback session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Capacity of each double-buffer region in bytes.
    pub buffer_capacity: usize,
    /// Sink buffer size as a multiple of the device minimum.
    pub sink_buffer_multiplier: usize,
    /// Minimum wait of the feed worker while the write region is still filling.
    pub feed_wait_floor: Duration,
    /// Upper bound on waiting for both workers to exit after a stop request.
    pub join_timeout: Duration,
}

impl Default for SessionConfig {
    /// Defaults tuned for local file playback.
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            sink_buffer_multiplier: 9,
            feed_wait_floor: Duration::from_millis(200),
            join_timeout: Duration::from_secs(2),
        }
    }
}
