//! Error types for the playback engine.

use std::io;
use std::path::PathBuf;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Everything that can go wrong while opening, decoding or playing a stream.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// The source file could not be opened or its stream header could not be parsed.
    #[error("cannot open source {path:?}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading or decoding failed in the middle of the stream.
    #[error("decode error: {0}")]
    DecodeIo(#[source] io::Error),

    /// The decode side produced more bytes than the write region can take without a swap.
    #[error("buffer overflow: {requested} bytes requested, {free} bytes free")]
    BufferOverflow { requested: usize, free: usize },

    /// No conversion path exists for the stream layout.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The audio output device failed.
    #[error("audio output error: {0}")]
    Sink(String),

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    /// The operation is not valid in the current session state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The session controller has shut down.
    #[error("playback session released")]
    Released,
}

/// Coarse classification handed to error listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Source, decode or device I/O.
    Io,
    /// The stream cannot be played by this engine.
    Unsupported,
    /// Contract violations and lifecycle misuse.
    Internal,
}

impl PlayerError {
    /// Classify the error for listener callbacks.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::SourceOpen { .. } | PlayerError::DecodeIo(_) | PlayerError::Sink(_) => {
                ErrorKind::Io
            }
            PlayerError::UnsupportedFormat(_) => ErrorKind::Unsupported,
            PlayerError::BufferOverflow { .. }
            | PlayerError::Spawn { .. }
            | PlayerError::InvalidState(_)
            | PlayerError::Released => ErrorKind::Internal,
        }
    }
}
