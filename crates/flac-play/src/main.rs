//! flac-play: a small CLI that streams a local file through a `flac-engine` playback session
//! and plays it via CPAL.
//!
//! ## Pipeline
//! 1. **Decode**: a worker thread reads frames through Symphonia, converts 24-bit audio to
//!    float and fills the write half of a double buffer.
//! 2. **Feed**: a second worker swaps the halves and pushes PCM into the output sink.
//! 3. **Playback**: the CPAL callback drains the sink queue, applying gain and channel mapping.
//!
//! ## Modes
//! - `play`: play a local file with interactive control on stdin.
//! - `info`: print the stream header.

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use flac_play::{cli, config, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,flac_engine=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let session = config::session_config(&args);
    match args.cmd {
        Some(cli::Command::Play {
            path,
            seek_ms,
            volume,
        }) => runtime::run_play(config::PlayConfig {
            path,
            device: args.device,
            seek_ms,
            volume,
            session,
        }),
        Some(cli::Command::Info { path }) => runtime::run_info(&path),
        None => bail!("no command given; try `flac-play play <path>` or `--list-devices`"),
    }
}
