use std::io;
use thiserror::Error;

use crate::command::CommandWord;

pub type Result<T> = std::result::Result<T, LdError>;

/// The primary error type for the `ld2402` library.
#[derive(Error, Debug)]
pub enum LdError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Radar is busy with another operation")]
    Busy,

    #[error("No acknowledgment for {command} within the timeout")]
    Timeout { command: CommandWord },

    #[error("Command {command} rejected by the radar (status {status:#06x})")]
    Nack { command: CommandWord, status: u16 },

    #[error("Radar is disconnected. Is the HLK-LD2402 powered and wired to the UART?")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Invalid reply to {command}: {message}")]
    InvalidReply { command: CommandWord, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Radar task is no longer running")]
    ChannelClosed,
}

/// A command parameter outside the range the radar accepts.
///
/// Raised before anything is written to the wire.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum EncodingError {
    #[error("Gate index {0} out of range (0..=13)")]
    GateOutOfRange(u8),

    #[error("Threshold {0} dB out of range (0..=95)")]
    ThresholdOutOfRange(f32),

    #[error("Max distance {0} m out of range (0.7..=10.0)")]
    MaxDistanceOutOfRange(f32),

    #[error("Disappear delay {0} s out of range (0..=65535)")]
    TimeoutOutOfRange(u32),

    #[error("Calibration factor {0} out of range (1.0..=20.0)")]
    CalibrationFactorOutOfRange(f32),

    #[error("Payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),
}
