//! Frame source backed by Symphonia.
//!
//! Uses Symphonia to:
//! - probe the container and read the stream header
//! - seek by sample index to the containing frame
//! - decode one packet at a time into interleaved little-endian PCM at the source bit depth

use std::fs::File;
use std::io;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{PlayerError, Result};
use crate::source::{FrameSource, SourceOpener, StreamInfo};

/// Opens local files through Symphonia's default probe and codec registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaOpener;

impl SourceOpener for SymphoniaOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let open_error = |source: io::Error| PlayerError::SourceOpen {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_error)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let source = SymphoniaSource::from_media_source(Box::new(file), hint).map_err(open_error)?;
        tracing::debug!(path = ?path, info = ?source.info, "source opened");
        Ok(Box::new(source))
    }
}

/// A probed Symphonia stream positioned on its default track.
pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: StreamInfo,
    samples: Option<SampleBuffer<i32>>,
    block: Vec<u8>,
    eof: bool,
}

impl SymphoniaSource {
    /// Probe `source` and prepare a decoder for its default track.
    pub fn from_media_source(source: Box<dyn MediaSource>, hint: Hint) -> io::Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(to_io)?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no default audio track"))?;
        let track_id = track.id;
        let params = track.codec_params.clone();
        let info = stream_info_from_params(&params)?;
        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(to_io)?;

        Ok(Self {
            format,
            decoder,
            track_id,
            info,
            samples: None,
            block: Vec::new(),
            eof: false,
        })
    }
}

impl FrameSource for SymphoniaSource {
    fn stream_info(&self) -> StreamInfo {
        self.info
    }

    fn seek(&mut self, sample: u64) -> Result<u64> {
        let seeked = match self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: sample,
                track_id: self.track_id,
            },
        ) {
            Ok(seeked) => seeked,
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                self.eof = true;
                return Ok(sample);
            }
            Err(e) => return Err(PlayerError::DecodeIo(to_io(e))),
        };
        self.decoder.reset();
        self.eof = false;
        Ok(seeked.actual_ts.min(sample))
    }

    fn next_block(&mut self) -> Result<Option<&[u8]>> {
        if self.eof {
            return Ok(None);
        }

        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.eof = true;
                    return Ok(None);
                }
                Err(e) => return Err(PlayerError::DecodeIo(to_io(e))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = self
                .decoder
                .decode(&packet)
                .map_err(|e| PlayerError::DecodeIo(to_io(e)))?;
            let spec = *decoded.spec();
            let needed = decoded.frames() * spec.channels.count();
            if needed == 0 {
                continue;
            }

            let samples = match &mut self.samples {
                Some(buf) if buf.capacity() >= needed => buf,
                slot => slot.insert(SampleBuffer::new(decoded.capacity() as u64, spec)),
            };
            samples.copy_interleaved_ref(decoded);
            pack_samples(samples.samples(), self.info.bits_per_sample, &mut self.block);
            return Ok(Some(&self.block));
        }
    }

    fn is_eof(&self) -> bool {
        self.eof
    }
}

/// Build [`StreamInfo`] from codec metadata.
fn stream_info_from_params(params: &CodecParameters) -> io::Result<StreamInfo> {
    let sample_rate = params
        .sample_rate
        .filter(|r| *r > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown sample rate"))?;
    let channels = params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown channel layout"))?;
    Ok(StreamInfo {
        sample_rate,
        channels: u16::try_from(channels).unwrap_or(u16::MAX),
        bits_per_sample: params
            .bits_per_sample
            .or(params.bits_per_coded_sample)
            .unwrap_or(0),
        total_samples: params.n_frames.unwrap_or(0),
    })
}

/// Narrow full-scale `i32` samples back to little-endian bytes at the source depth.
fn pack_samples(samples: &[i32], bits_per_sample: u32, out: &mut Vec<u8>) {
    out.clear();
    match bits_per_sample {
        8 => out.extend(samples.iter().map(|&s| ((s >> 24) + 128) as u8)),
        24 => {
            for &s in samples {
                out.extend_from_slice(&(s >> 8).to_le_bytes()[..3]);
            }
        }
        32 => {
            for &s in samples {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
        _ => {
            for &s in samples {
                out.extend_from_slice(&((s >> 16) as i16).to_le_bytes());
            }
        }
    }
}

fn to_io(err: SymphoniaError) -> io::Error {
    match err {
        SymphoniaError::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
