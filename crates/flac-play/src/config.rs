use std::path::PathBuf;

use flac_engine::SessionConfig;

use crate::cli::Args;

const MIB: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub seek_ms: Option<u64>,
    pub volume: Option<f32>,
    pub session: SessionConfig,
}

/// Session tuning from the command line; unset values keep the engine defaults.
pub fn session_config(args: &Args) -> SessionConfig {
    SessionConfig {
        buffer_capacity: args.buffer_mib.max(1) * MIB,
        sink_buffer_multiplier: args.sink_buffer_multiplier.max(1),
        ..SessionConfig::default()
    }
}

pub fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
