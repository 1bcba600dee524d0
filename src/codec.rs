//! Incremental decoder for the radar's serial byte stream.
//!
//! The stream interleaves three kinds of units: binary command/ACK frames,
//! binary data frames and (in normal work mode) ASCII report lines. The
//! decoder buffers whatever has arrived, hands out one unit per call and
//! resynchronizes past anything it cannot frame.
//!
//! Every decision is made from the bytes at the current position alone, so
//! feeding the stream one byte at a time yields exactly the same sequence of
//! results as feeding it in one piece. A run of unusable bytes is reported
//! once, as a single [`Decoded::CorruptFrame`], when the next plausible frame
//! start is reached.

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::command::Command;
use crate::constants::*;
use crate::error::EncodingError;
use crate::frame::{Frame, FrameFamily};

/// Result of one [`FrameDecoder::decode`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete, validated frame
    Frame(Frame),
    /// The buffered bytes do not hold a complete unit yet
    NeedMoreBytes,
    /// `discarded` bytes could not be framed and were dropped
    CorruptFrame { discarded: usize },
}

enum Attempt {
    Frame(Frame),
    NeedMore,
    /// Drop this many bytes and rescan
    Corrupt(usize),
    /// Consume this many bytes without reporting anything (blank line)
    Skip(usize),
}

/// Receive-side byte buffer and frame parser.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    discarded: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(FRAME_OVERHEAD + MAX_BODY_LEN),
            discarded: 0,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes buffered and not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered, including a pending corrupt run
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarded = 0;
    }

    /// Decode the next unit from the buffer.
    pub fn decode(&mut self) -> Decoded {
        loop {
            let Some(&first) = self.buffer.first() else {
                return Decoded::NeedMoreBytes;
            };

            let family = FrameFamily::from_first_byte(first);
            if family.is_none() && !is_line_byte(first) {
                self.discard(1);
                continue;
            }

            if self.discarded > 0 {
                let discarded = std::mem::take(&mut self.discarded);
                trace!("Resynchronized after {} discarded bytes", discarded);
                return Decoded::CorruptFrame { discarded };
            }

            let attempt = match family {
                Some(family) => self.try_binary(family),
                None => self.try_line(),
            };

            match attempt {
                Attempt::Frame(frame) => return Decoded::Frame(frame),
                Attempt::NeedMore => return Decoded::NeedMoreBytes,
                Attempt::Corrupt(count) => self.discard(count),
                Attempt::Skip(count) => self.buffer.advance(count),
            }
        }
    }

    fn discard(&mut self, count: usize) {
        self.buffer.advance(count);
        self.discarded += count;
    }

    fn try_binary(&mut self, family: FrameFamily) -> Attempt {
        let header = family.header();
        let available = self.buffer.len().min(MARKER_SIZE);
        if self.buffer[..available] != header[..available] {
            return Attempt::Corrupt(1);
        }
        if self.buffer.len() < MARKER_SIZE + LENGTH_SIZE {
            return Attempt::NeedMore;
        }

        let body_len = u16::from_le_bytes([self.buffer[4], self.buffer[5]]) as usize;
        if body_len > MAX_BODY_LEN || (family == FrameFamily::Command && body_len < 2) {
            return Attempt::Corrupt(1);
        }

        let total = FRAME_OVERHEAD + body_len;
        if self.buffer.len() < total {
            return Attempt::NeedMore;
        }

        let body_end = MARKER_SIZE + LENGTH_SIZE + body_len;
        if &self.buffer[body_end..total] != family.footer() {
            return Attempt::Corrupt(1);
        }

        let raw = self.buffer.split_to(total).freeze();
        trace!("RX {}", hex::encode(&raw));
        let body = raw.slice(MARKER_SIZE + LENGTH_SIZE..body_end);

        let frame = match family {
            FrameFamily::Command => {
                let word = u16::from_le_bytes([body[0], body[1]]);
                Frame::Command {
                    word,
                    payload: body.slice(2..),
                }
            }
            FrameFamily::Report => Frame::Report { body },
        };
        Attempt::Frame(frame)
    }

    fn try_line(&mut self) -> Attempt {
        let end = self
            .buffer
            .iter()
            .take(MAX_LINE_LEN + 1)
            .position(|&byte| byte == b'\n' || !is_line_byte(byte));

        match end {
            Some(index) if self.buffer[index] == b'\n' => {
                let line = String::from_utf8_lossy(&self.buffer[..index]).trim().to_string();
                if line.is_empty() {
                    return Attempt::Skip(index + 1);
                }
                self.buffer.advance(index + 1);
                trace!("RX line {:?}", line);
                Attempt::Frame(Frame::Text(line))
            }
            // the first byte is a line byte, so index > 0 here
            Some(index) => Attempt::Corrupt(index),
            None if self.buffer.len() > MAX_LINE_LEN => Attempt::Corrupt(MAX_LINE_LEN),
            None => Attempt::NeedMore,
        }
    }
}

/// Bytes that may appear in a normal-mode report line
fn is_line_byte(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n' || (0x20..=0x7E).contains(&byte)
}

/// Serialize a command into its wire frame.
pub fn encode(command: &Command) -> Result<bytes::Bytes, EncodingError> {
    command.encode()
}

/// Decode a single frame from a complete buffer.
///
/// Returns `None` unless the buffer holds exactly one well-formed unit,
/// optionally preceded by a blank line.
pub fn decode_frame(bytes: &[u8]) -> Option<Frame> {
    let mut decoder = FrameDecoder::new();
    decoder.push(bytes);
    match decoder.decode() {
        Decoded::Frame(frame) if decoder.buffered() == 0 => Some(frame),
        _ => None,
    }
}
