//! Sample conversion between decoded frame bytes and the PCM layout handed to the sink.
//!
//! Decoded blocks arrive as interleaved little-endian samples at the source bit depth.
//! - 8-bit (unsigned) and 16-bit (signed) samples pass through untouched
//! - 24-bit samples become little-endian `f32`
//! - 32-bit and unknown depths have no conversion path

use crate::error::{PlayerError, Result};

/// Scale applied to the packed 24-bit value.
pub const STEP_24BIT: f32 = 2.0 / 16_777_216.0;

/// Source sample width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitDepth {
    Bit8,
    Bit16,
    Bit24,
    Bit32,
    Unknown,
}

impl BitDepth {
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            8 => BitDepth::Bit8,
            16 => BitDepth::Bit16,
            24 => BitDepth::Bit24,
            32 => BitDepth::Bit32,
            _ => BitDepth::Unknown,
        }
    }

    /// Bytes per sample in a decoded block.
    pub fn bytes_per_sample(self) -> Option<usize> {
        match self {
            BitDepth::Bit8 => Some(1),
            BitDepth::Bit16 => Some(2),
            BitDepth::Bit24 => Some(3),
            BitDepth::Bit32 => Some(4),
            BitDepth::Unknown => None,
        }
    }

    /// Whether [`convert_block`] can handle this depth.
    pub fn is_playable(self) -> bool {
        matches!(self, BitDepth::Bit8 | BitDepth::Bit16 | BitDepth::Bit24)
    }

    pub fn label(self) -> &'static str {
        match self {
            BitDepth::Bit8 => "8bit",
            BitDepth::Bit16 => "16bit",
            BitDepth::Bit24 => "24bit",
            BitDepth::Bit32 => "32bit",
            BitDepth::Unknown => "Unknown",
        }
    }
}

/// Convert one packed 24-bit little-endian sample to a float.
///
/// `b2` carries the sign. The middle byte is weighted by 255, not 256.
pub fn sample_24_to_f32(b0: u8, b1: u8, b2: u8) -> f32 {
    let packed = 65_536 * i32::from(b2 as i8) + 255 * i32::from(b1) + i32::from(b0);
    STEP_24BIT * packed as f32
}

/// Convert a decoded block into sink PCM, appending to `out`.
///
/// `out` is cleared first so callers can reuse one allocation across frames.
pub fn convert_block(depth: BitDepth, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    match depth {
        BitDepth::Bit8 | BitDepth::Bit16 => out.extend_from_slice(block),
        BitDepth::Bit24 => {
            debug_assert_eq!(block.len() % 3, 0, "24-bit block is not sample aligned");
            out.reserve(block.len() / 3 * 4);
            for s in block.chunks_exact(3) {
                out.extend_from_slice(&sample_24_to_f32(s[0], s[1], s[2]).to_le_bytes());
            }
        }
        BitDepth::Bit32 | BitDepth::Unknown => {
            return Err(PlayerError::UnsupportedFormat(format!(
                "no conversion for {} samples",
                depth.label()
            )));
        }
    }
    Ok(())
}
