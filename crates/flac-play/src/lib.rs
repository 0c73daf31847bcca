//! Command-line player built on `flac-engine`.

pub mod cli;
pub mod config;
pub mod runtime;
