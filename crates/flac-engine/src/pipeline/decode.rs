//! Decode worker: frame source → converter → write region.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, select};

use crate::convert::{BitDepth, convert_block};
use crate::double_buffer::DoubleBuffer;
use crate::error::{PlayerError, Result};
use crate::source::FrameSource;

use super::{Epoch, StopToken, lock_buffer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DecodeExit {
    EndOfStream,
    Stopped,
}

pub(crate) struct DecodeWorker {
    source: Box<dyn FrameSource>,
    depth: BitDepth,
    buffer: Arc<Mutex<DoubleBuffer>>,
    ready: Sender<Epoch>,
    resume: Receiver<()>,
    stop: StopToken,
}

impl DecodeWorker {
    pub fn new(
        source: Box<dyn FrameSource>,
        buffer: Arc<Mutex<DoubleBuffer>>,
        ready: Sender<Epoch>,
        resume: Receiver<()>,
        stop: StopToken,
    ) -> Self {
        let depth = source.stream_info().bit_depth();
        Self {
            source,
            depth,
            buffer,
            ready,
            resume,
            stop,
        }
    }

    /// Decode until end of stream, cancellation or error.
    ///
    /// The source is always handed back so the session can reuse it for the next run.
    pub fn run(mut self) -> (Box<dyn FrameSource>, Result<DecodeExit>) {
        let result = self.decode();
        (self.source, result)
    }

    fn decode(&mut self) -> Result<DecodeExit> {
        let mut converted = Vec::new();
        loop {
            if self.stop.is_stopped() {
                return Ok(DecodeExit::Stopped);
            }
            if self.source.is_eof() {
                break;
            }
            let Some(block) = self.source.next_block()? else {
                break;
            };
            convert_block(self.depth, block, &mut converted)?;
            if !self.append(&converted)? {
                return Ok(DecodeExit::Stopped);
            }
        }

        if self.hand_off(true) {
            Ok(DecodeExit::EndOfStream)
        } else {
            Ok(DecodeExit::Stopped)
        }
    }

    /// Append one converted frame, handing the region off first when it is full.
    ///
    /// Returns `false` when the run was cancelled while waiting for the swap.
    fn append(&self, data: &[u8]) -> Result<bool> {
        loop {
            {
                let mut buffer = lock_buffer(&self.buffer);
                if data.len() > buffer.capacity() {
                    return Err(PlayerError::BufferOverflow {
                        requested: data.len(),
                        free: buffer.free_bytes(),
                    });
                }
                if data.len() <= buffer.free_bytes() {
                    buffer.write(data)?;
                    return Ok(true);
                }
            }
            if !self.hand_off(false) {
                return Ok(false);
            }
        }
    }

    /// Announce a filled region and, unless it is the last one, wait for the swap.
    fn hand_off(&self, end_of_stream: bool) -> bool {
        select! {
            send(self.ready, Epoch { end_of_stream }) -> res => {
                if res.is_err() {
                    return false;
                }
            }
            recv(self.stop.signal()) -> _ => return false,
        }
        if end_of_stream {
            return true;
        }

        select! {
            recv(self.resume) -> res => res.is_ok(),
            recv(self.stop.signal()) -> _ => false,
        }
    }
}
