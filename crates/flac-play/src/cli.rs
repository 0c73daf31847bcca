use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "flac-play", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Size of each decode buffer region in MiB
    #[arg(long, default_value_t = 4)]
    pub buffer_mib: usize,

    /// Sink buffer size as a multiple of the device minimum
    #[arg(long, default_value_t = 9)]
    pub sink_buffer_multiplier: usize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file; type `p`, `s <ms>`, `i` or `q` on stdin while playing
    Play {
        /// Path to audio file (FLAC recommended)
        path: PathBuf,

        /// Start position in milliseconds
        #[arg(long)]
        seek_ms: Option<u64>,

        /// Replay-gain volume, 0.0 to 1.0
        #[arg(long)]
        volume: Option<f32>,
    },

    /// Print the stream header of a file
    Info {
        path: PathBuf,
    },
}
