//! Double-buffered streaming playback engine for frame-based audio bitstreams.
//!
//! A [`session::PlaybackSession`] owns two worker threads:
//! - a decode worker pulling frames from a [`source::FrameSource`], converting them and filling
//!   the write half of a [`double_buffer::DoubleBuffer`]
//! - a feed worker swapping the halves and pushing PCM into an [`sink::AudioSink`] at the pace
//!   the sink accepts it
//!
//! Concrete collaborators are provided for Symphonia (source) and CPAL (sink).

pub mod config;
pub mod convert;
pub mod cpal_sink;
pub mod device;
pub mod double_buffer;
pub mod error;
pub mod gain;
pub mod queue;
pub mod session;
pub mod sink;
pub mod source;
pub mod status;
pub mod symphonia_source;

mod pipeline;

#[cfg(test)]
mod test_support;

pub use config::SessionConfig;
pub use error::{ErrorKind, PlayerError, Result};
pub use session::{PlaybackSession, PlaybackState};
