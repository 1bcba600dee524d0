use bytes::{BufMut, Bytes, BytesMut};
use num_enum::FromPrimitive;

use crate::command::CommandWord;
use crate::constants::*;
use crate::error::EncodingError;

/// Which of the two binary frame families a header belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFamily {
    /// `FD FC FB FA ... 04 03 02 01`, host commands and radar acknowledgments
    Command,
    /// `F4 F3 F2 F1 ... F8 F7 F6 F5`, telemetry reports
    Report,
}

impl FrameFamily {
    pub fn header(self) -> &'static [u8; MARKER_SIZE] {
        match self {
            FrameFamily::Command => &CMD_HEADER,
            FrameFamily::Report => &REPORT_HEADER,
        }
    }

    pub fn footer(self) -> &'static [u8; MARKER_SIZE] {
        match self {
            FrameFamily::Command => &CMD_FOOTER,
            FrameFamily::Report => &REPORT_FOOTER,
        }
    }

    /// Family whose header starts with `byte`, if any
    pub fn from_first_byte(byte: u8) -> Option<Self> {
        if byte == CMD_HEADER[0] {
            Some(FrameFamily::Command)
        } else if byte == REPORT_HEADER[0] {
            Some(FrameFamily::Report)
        } else {
            None
        }
    }
}

/// One unit of the serial protocol, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Command frame (host to radar) or acknowledgment (radar to host).
    /// `word` is the raw command word, ACK flag included.
    Command { word: u16, payload: Bytes },
    /// Data frame carrying a telemetry report
    Report { body: Bytes },
    /// ASCII line printed by the radar in normal work mode, terminator stripped
    Text(String),
}

impl Frame {
    pub fn command(word: CommandWord, payload: impl Into<Bytes>) -> Self {
        Frame::Command {
            word: word.into(),
            payload: payload.into(),
        }
    }

    pub fn family(&self) -> Option<FrameFamily> {
        match self {
            Frame::Command { .. } => Some(FrameFamily::Command),
            Frame::Report { .. } => Some(FrameFamily::Report),
            Frame::Text(_) => None,
        }
    }

    /// Command word with the ACK flag removed
    pub fn command_word(&self) -> Option<CommandWord> {
        match self {
            Frame::Command { word, .. } => Some(CommandWord::from_primitive(word & !ACK_FLAG)),
            _ => None,
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Frame::Command { word, .. } if word & ACK_FLAG != 0)
    }

    /// Serialize the frame to wire bytes.
    ///
    /// Text frames are terminated with `\r\n` the way the radar prints them.
    pub fn encode(&self) -> Result<Bytes, EncodingError> {
        match self {
            Frame::Command { word, payload } => {
                let body_len = 2 + payload.len();
                let mut out = start_frame(FrameFamily::Command, body_len)?;
                out.put_u16_le(*word);
                out.put_slice(payload);
                out.put_slice(&CMD_FOOTER);
                Ok(out.freeze())
            }
            Frame::Report { body } => {
                let mut out = start_frame(FrameFamily::Report, body.len())?;
                out.put_slice(body);
                out.put_slice(&REPORT_FOOTER);
                Ok(out.freeze())
            }
            Frame::Text(line) => {
                if line.len() > MAX_LINE_LEN {
                    return Err(EncodingError::PayloadTooLarge(line.len()));
                }
                let mut out = BytesMut::with_capacity(line.len() + 2);
                out.put_slice(line.as_bytes());
                out.put_slice(b"\r\n");
                Ok(out.freeze())
            }
        }
    }
}

fn start_frame(family: FrameFamily, body_len: usize) -> Result<BytesMut, EncodingError> {
    if body_len > MAX_BODY_LEN {
        return Err(EncodingError::PayloadTooLarge(body_len));
    }
    let mut out = BytesMut::with_capacity(FRAME_OVERHEAD + body_len);
    out.put_slice(family.header());
    out.put_u16_le(body_len as u16);
    Ok(out)
}
