//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing an output config that runs at the stream's own sample rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config running at exactly `sample_rate`.
///
/// Streams are never resampled, so ranges that cannot run at the stream rate are skipped.
/// Among the rest, a matching channel count wins, then the preferred sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(bool, u8, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        if sample_rate < range.min_sample_rate() || sample_rate > range.max_sample_rate() {
            continue;
        }
        let channel_match = range.channels() == channels;
        let format_rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_match, b_rank, _)) => {
                is_better_candidate(channel_match, format_rank, *b_match, *b_rank)
            }
        };
        if replace {
            best = Some((channel_match, format_rank, range.with_sample_rate(sample_rate)));
        }
    }

    best.map(|(_, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("Output device does not support {sample_rate} Hz"))
}

/// Prefer a fixed callback buffer no larger than the sink buffer.
///
/// Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    max_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let cap = max_frames.max(*min);
            Some(cpal::BufferSize::Fixed((*max).min(cap)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(
    channel_match: bool,
    format_rank: u8,
    best_channel_match: bool,
    best_rank: u8,
) -> bool {
    if channel_match != best_channel_match {
        channel_match
    } else {
        format_rank < best_rank
    }
}

/// Print available output devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn channel_match_beats_sample_format() {
        assert!(is_better_candidate(true, 2, false, 0));
        assert!(!is_better_candidate(false, 0, true, 3));
    }

    #[test]
    fn lower_rank_wins_when_channels_agree() {
        assert!(is_better_candidate(true, 0, true, 2));
        assert!(!is_better_candidate(true, 2, true, 2));
    }

    #[test]
    fn float_output_is_preferred() {
        assert!(
            sample_format_rank(cpal::SampleFormat::F32)
                < sample_format_rank(cpal::SampleFormat::I16)
        );
    }
}
