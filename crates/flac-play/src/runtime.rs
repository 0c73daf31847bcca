//! Player runtime helpers.
//!
//! Provides device enumeration, header inspection and interactive local playback.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, bounded, never, select, unbounded};

use flac_engine::convert::BitDepth;
use flac_engine::cpal_sink::CpalOutput;
use flac_engine::source::SourceOpener;
use flac_engine::symphonia_source::SymphoniaOpener;
use flac_engine::{PlaybackSession, PlaybackState, device};

use crate::config::{PlayConfig, normalize_device_name};

/// A line typed on stdin during playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    TogglePause,
    Seek(u64),
    Status,
    Quit,
}

/// Parse one console line; `None` for blank or unknown input.
pub fn parse_console_command(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.split_whitespace();
    let cmd = match parts.next()? {
        "p" | "pause" => ConsoleCommand::TogglePause,
        "s" | "seek" => ConsoleCommand::Seek(parts.next()?.parse().ok()?),
        "i" | "info" => ConsoleCommand::Status,
        "q" | "quit" => ConsoleCommand::Quit,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(cmd)
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Print the stream header of `path`.
pub fn run_info(path: &Path) -> Result<()> {
    let source = SymphoniaOpener
        .open(path)
        .with_context(|| format!("open {path:?}"))?;
    let info = source.stream_info();
    println!("path:            {}", path.display());
    println!("sample rate:     {} Hz", info.sample_rate);
    println!("channels:        {}", info.channels);
    println!("bits per sample: {}", BitDepth::from_bits(info.bits_per_sample).label());
    if info.total_samples > 0 {
        println!("total samples:   {}", info.total_samples);
        println!("duration:        {} ms", info.duration_ms());
    } else {
        println!("duration:        unknown");
    }
    Ok(())
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("flac-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(rx)
}

/// Play a local file until it completes, fails, or the user quits.
pub fn run_play(config: PlayConfig) -> Result<()> {
    let device = normalize_device_name(config.device);
    let output = Arc::new(CpalOutput::new(device));
    let session = PlaybackSession::new(Arc::new(SymphoniaOpener), output, config.session)
        .context("start playback session")?;

    let (done_tx, done_rx) = bounded::<()>(1);
    session.set_on_completion_listener(move || {
        let _ = done_tx.try_send(());
    });
    let (err_tx, err_rx) = unbounded::<String>();
    session.set_on_error_listener(move |e| {
        let _ = err_tx.send(format!("{e} ({:?})", e.kind()));
    });

    let (int_tx, int_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = int_tx.try_send(());
    })
    .context("install ctrl-c handler")?;

    session
        .set_source(&config.path)
        .with_context(|| format!("open {:?}", config.path))?;
    if let Some(volume) = config.volume {
        session.set_volume(volume);
    }
    if let Some(ms) = config.seek_ms {
        session.seek_to(ms).context("seek")?;
    }
    session.play().context("start playback")?;

    let status = session.status()?;
    tracing::info!(
        path = ?config.path,
        sample_rate = status.sample_rate,
        channels = status.channels,
        bits = status.bits_per_sample,
        playback = status.playback_bits_per_sample,
        duration_ms = status.duration_ms,
        "playing"
    );

    let mut lines = spawn_stdin_reader()?;
    let mut stdin_closed = false;
    loop {
        if stdin_closed {
            // Keep playing until completion.
            lines = never();
            stdin_closed = false;
        }
        select! {
            recv(done_rx) -> _ => {
                tracing::info!("playback finished");
                return Ok(());
            }
            recv(err_rx) -> msg => {
                let msg = msg.unwrap_or_else(|_| "unknown error".to_string());
                return Err(anyhow!("playback failed: {msg}"));
            }
            recv(int_rx) -> _ => {
                tracing::info!("interrupted");
                session.stop()?;
                return Ok(());
            }
            recv(lines) -> line => {
                let Ok(line) = line else {
                    stdin_closed = true;
                    continue;
                };
                match parse_console_command(&line) {
                    Some(ConsoleCommand::Quit) => {
                        session.stop()?;
                        return Ok(());
                    }
                    Some(cmd) => {
                        if let Err(e) = apply_console_command(&session, cmd) {
                            tracing::warn!("{e:#}");
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => tracing::warn!(input = %line.trim(), "unknown command; use p, s <ms>, i or q"),
                }
            }
        }
    }
}

fn apply_console_command(session: &PlaybackSession, cmd: ConsoleCommand) -> Result<()> {
    match cmd {
        ConsoleCommand::TogglePause => match session.state() {
            PlaybackState::Decoding => session.pause().context("pause")?,
            _ => session.play().context("resume")?,
        },
        ConsoleCommand::Seek(ms) => session.seek_to(ms).context("seek")?,
        ConsoleCommand::Status => println!("{}", session.status()?),
        ConsoleCommand::Quit => session.stop()?,
    }
    Ok(())
}
