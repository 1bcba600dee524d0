use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use strum_macros::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{EncodingError, LdError};
use crate::frame::Frame;

/// Command words of the LD2402 serial protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive, Display)]
#[repr(u16)]
pub enum CommandWord {
    ReadFirmwareVersion = 0x0000,
    SetParameter = 0x0007,
    ReadParameter = 0x0008,
    StartCalibration = 0x0009,
    QueryCalibrationProgress = 0x000A,
    SetWorkMode = 0x0012,
    AutoGain = 0x00EE,
    /// Sent by the radar on its own once auto gain adjustment finished
    AutoGainComplete = 0x00F0,
    SaveParameters = 0x00FD,
    DisableConfig = 0x00FE,
    EnableConfig = 0x00FF,

    #[num_enum(catch_all)]
    Unknown(u16),
}

impl CommandWord {
    /// Word the radar answers this command with
    pub fn ack_word(self) -> u16 {
        let value: u16 = self.into();
        value | ACK_FLAG
    }
}

/// A distance gate index, always within `0..=13`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gate(u8);

impl Gate {
    pub fn new(index: u8) -> Result<Self, EncodingError> {
        if index > MAX_GATE {
            return Err(EncodingError::GateOutOfRange(index));
        }
        Ok(Gate(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Gate> {
        (0..=MAX_GATE).map(Gate)
    }
}

impl TryFrom<u8> for Gate {
    type Error = EncodingError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Gate::new(index)
    }
}

/// Detection threshold. The radar stores thresholds as linear energy,
/// `10^(dB/10)`, which is what this type holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Threshold(u32);

impl Threshold {
    pub fn from_db(db: f32) -> Result<Self, EncodingError> {
        if !(MIN_THRESHOLD_DB..=MAX_THRESHOLD_DB).contains(&db) {
            return Err(EncodingError::ThresholdOutOfRange(db));
        }
        let energy = 10f64.powf(db as f64 / 10.0).round() as u32;
        Ok(Threshold(energy))
    }

    pub fn from_energy(energy: u32) -> Self {
        Threshold(energy)
    }

    pub fn energy(self) -> u32 {
        self.0
    }

    pub fn db(self) -> f32 {
        crate::reading::energy_db(self.0)
    }
}

/// Maximum detection distance, held in the radar's 0.1 m unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaxDistance(u16);

impl MaxDistance {
    pub fn from_meters(meters: f32) -> Result<Self, EncodingError> {
        if !(MIN_MAX_DISTANCE_M..=MAX_MAX_DISTANCE_M).contains(&meters) {
            return Err(EncodingError::MaxDistanceOutOfRange(meters));
        }
        Ok(MaxDistance((meters * 10.0).round() as u16))
    }

    pub fn from_decimeters(decimeters: u16) -> Result<Self, EncodingError> {
        let min = (MIN_MAX_DISTANCE_M * 10.0).round() as u16;
        let max = (MAX_MAX_DISTANCE_M * 10.0).round() as u16;
        if !(min..=max).contains(&decimeters) {
            return Err(EncodingError::MaxDistanceOutOfRange(decimeters as f32 / 10.0));
        }
        Ok(MaxDistance(decimeters))
    }

    pub fn decimeters(self) -> u16 {
        self.0
    }

    pub fn meters(self) -> f32 {
        self.0 as f32 / 10.0
    }
}

/// Coefficients for automatic threshold generation, each sent ×10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationFactors {
    pub trigger: u16,
    pub hold: u16,
    pub micromotion: u16,
}

impl CalibrationFactors {
    pub fn new(trigger: f32, hold: f32, micromotion: f32) -> Result<Self, EncodingError> {
        let scale = |factor: f32| {
            if !(MIN_CALIBRATION_FACTOR..=MAX_CALIBRATION_FACTOR).contains(&factor) {
                return Err(EncodingError::CalibrationFactorOutOfRange(factor));
            }
            Ok((factor * 10.0).round() as u16)
        };
        Ok(Self {
            trigger: scale(trigger)?,
            hold: scale(hold)?,
            micromotion: scale(micromotion)?,
        })
    }
}

impl Default for CalibrationFactors {
    fn default() -> Self {
        let value = (DEFAULT_CALIBRATION_FACTOR * 10.0) as u16;
        Self {
            trigger: value,
            hold: value,
            micromotion: value,
        }
    }
}

/// Radar output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WorkMode {
    /// ASCII distance lines
    #[default]
    Normal,
    /// Binary data frames with per-gate energies
    Engineering,
}

impl WorkMode {
    pub fn wire_value(self) -> u32 {
        match self {
            WorkMode::Normal => 0x64,
            WorkMode::Engineering => 0x04,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0x00 | 0x64 => Some(WorkMode::Normal),
            0x04 => Some(WorkMode::Engineering),
            _ => None,
        }
    }
}

/// Parameters reachable through the set/read parameter commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Parameter {
    MaxDistance,
    DisappearDelay,
    MotionThreshold(Gate),
    MicromotionThreshold(Gate),
}

impl Parameter {
    const MAX_DISTANCE_ID: u16 = 0x0001;
    const DISAPPEAR_DELAY_ID: u16 = 0x0004;
    const MOTION_THRESHOLD_BASE: u16 = 0x0010;
    const MICROMOTION_THRESHOLD_BASE: u16 = 0x0030;

    pub fn id(self) -> u16 {
        match self {
            Parameter::MaxDistance => Self::MAX_DISTANCE_ID,
            Parameter::DisappearDelay => Self::DISAPPEAR_DELAY_ID,
            Parameter::MotionThreshold(gate) => Self::MOTION_THRESHOLD_BASE + gate.index() as u16,
            Parameter::MicromotionThreshold(gate) => Self::MICROMOTION_THRESHOLD_BASE + gate.index() as u16,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        let gate_at = |base: u16| u8::try_from(id - base).ok().and_then(|index| Gate::new(index).ok());
        match id {
            Self::MAX_DISTANCE_ID => Some(Parameter::MaxDistance),
            Self::DISAPPEAR_DELAY_ID => Some(Parameter::DisappearDelay),
            0x0010..=0x001F => gate_at(Self::MOTION_THRESHOLD_BASE).map(Parameter::MotionThreshold),
            0x0030..=0x003F => gate_at(Self::MICROMOTION_THRESHOLD_BASE).map(Parameter::MicromotionThreshold),
            _ => None,
        }
    }
}

/// A host-to-radar command with its validated arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EnterConfig,
    ExitConfig,
    SetMaxDistance(MaxDistance),
    /// Disappear delay in seconds
    SetTimeout(u16),
    SetGateMotionThreshold { gate: Gate, threshold: Threshold },
    SetGateMicromotionThreshold { gate: Gate, threshold: Threshold },
    StartCalibration(CalibrationFactors),
    QueryCalibrationProgress,
    EnableAutoGain,
    SaveConfig,
    SetWorkMode(WorkMode),
    QueryFirmwareVersion,
    ReadParameter(Parameter),
}

impl Command {
    pub fn word(&self) -> CommandWord {
        match self {
            Command::EnterConfig => CommandWord::EnableConfig,
            Command::ExitConfig => CommandWord::DisableConfig,
            Command::SetMaxDistance(_)
            | Command::SetTimeout(_)
            | Command::SetGateMotionThreshold { .. }
            | Command::SetGateMicromotionThreshold { .. } => CommandWord::SetParameter,
            Command::StartCalibration(_) => CommandWord::StartCalibration,
            Command::QueryCalibrationProgress => CommandWord::QueryCalibrationProgress,
            Command::EnableAutoGain => CommandWord::AutoGain,
            Command::SaveConfig => CommandWord::SaveParameters,
            Command::SetWorkMode(_) => CommandWord::SetWorkMode,
            Command::QueryFirmwareVersion => CommandWord::ReadFirmwareVersion,
            Command::ReadParameter(_) => CommandWord::ReadParameter,
        }
    }

    /// Every command except the configuration bracket itself must be sent
    /// while configuration mode is open.
    pub fn requires_config(&self) -> bool {
        !self.is_bracket()
    }

    pub fn is_bracket(&self) -> bool {
        matches!(self, Command::EnterConfig | Command::ExitConfig)
    }

    pub fn payload(&self) -> Bytes {
        let mut out = BytesMut::new();
        match *self {
            Command::EnterConfig => out.put_u16_le(ENABLE_CONFIG_VALUE),
            Command::SetMaxDistance(distance) => {
                put_parameter(&mut out, Parameter::MaxDistance, distance.decimeters() as u32)
            }
            Command::SetTimeout(seconds) => put_parameter(&mut out, Parameter::DisappearDelay, seconds as u32),
            Command::SetGateMotionThreshold { gate, threshold } => {
                put_parameter(&mut out, Parameter::MotionThreshold(gate), threshold.energy())
            }
            Command::SetGateMicromotionThreshold { gate, threshold } => {
                put_parameter(&mut out, Parameter::MicromotionThreshold(gate), threshold.energy())
            }
            Command::StartCalibration(factors) => {
                out.put_u16_le(factors.trigger);
                out.put_u16_le(factors.hold);
                out.put_u16_le(factors.micromotion);
            }
            Command::SetWorkMode(mode) => {
                out.put_u16_le(0x0000);
                out.put_u32_le(mode.wire_value());
            }
            Command::ReadParameter(parameter) => out.put_u16_le(parameter.id()),
            Command::ExitConfig
            | Command::QueryCalibrationProgress
            | Command::EnableAutoGain
            | Command::SaveConfig
            | Command::QueryFirmwareVersion => {}
        }
        out.freeze()
    }

    pub fn to_frame(&self) -> Frame {
        Frame::command(self.word(), self.payload())
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Bytes, EncodingError> {
        self.to_frame().encode()
    }

    /// Parse a host command frame back into a `Command`.
    ///
    /// Returns `None` for acknowledgments, non-command frames and payloads
    /// that do not match the command word.
    pub fn from_frame(frame: &Frame) -> Option<Command> {
        let Frame::Command { word, payload } = frame else {
            return None;
        };
        if frame.is_ack() {
            return None;
        }
        let mut payload = payload.clone();
        let command = match CommandWord::from_primitive(*word) {
            CommandWord::EnableConfig => {
                if payload.remaining() < 2 || payload.get_u16_le() != ENABLE_CONFIG_VALUE {
                    return None;
                }
                Command::EnterConfig
            }
            CommandWord::DisableConfig => Command::ExitConfig,
            CommandWord::ReadFirmwareVersion => Command::QueryFirmwareVersion,
            CommandWord::QueryCalibrationProgress => Command::QueryCalibrationProgress,
            CommandWord::AutoGain => Command::EnableAutoGain,
            CommandWord::SaveParameters => Command::SaveConfig,
            CommandWord::SetParameter => {
                if payload.remaining() < 6 {
                    return None;
                }
                let parameter = Parameter::from_id(payload.get_u16_le())?;
                let value = payload.get_u32_le();
                match parameter {
                    Parameter::MaxDistance => {
                        Command::SetMaxDistance(MaxDistance::from_decimeters(u16::try_from(value).ok()?).ok()?)
                    }
                    Parameter::DisappearDelay => Command::SetTimeout(u16::try_from(value).ok()?),
                    Parameter::MotionThreshold(gate) => Command::SetGateMotionThreshold {
                        gate,
                        threshold: Threshold::from_energy(value),
                    },
                    Parameter::MicromotionThreshold(gate) => Command::SetGateMicromotionThreshold {
                        gate,
                        threshold: Threshold::from_energy(value),
                    },
                }
            }
            CommandWord::ReadParameter => {
                if payload.remaining() < 2 {
                    return None;
                }
                Command::ReadParameter(Parameter::from_id(payload.get_u16_le())?)
            }
            CommandWord::StartCalibration => {
                if payload.remaining() < 6 {
                    return None;
                }
                Command::StartCalibration(CalibrationFactors {
                    trigger: payload.get_u16_le(),
                    hold: payload.get_u16_le(),
                    micromotion: payload.get_u16_le(),
                })
            }
            CommandWord::SetWorkMode => {
                if payload.remaining() < 6 {
                    return None;
                }
                payload.advance(2);
                Command::SetWorkMode(WorkMode::from_wire(payload.get_u32_le())?)
            }
            CommandWord::AutoGainComplete | CommandWord::Unknown(_) => return None,
        };
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetMaxDistance(distance) => write!(f, "SetMaxDistance({:.1} m)", distance.meters()),
            Command::SetTimeout(seconds) => write!(f, "SetTimeout({} s)", seconds),
            Command::SetGateMotionThreshold { gate, threshold } => {
                write!(f, "SetGateMotionThreshold(gate {}, {:.1} dB)", gate.index(), threshold.db())
            }
            Command::SetGateMicromotionThreshold { gate, threshold } => {
                write!(f, "SetGateMicromotionThreshold(gate {}, {:.1} dB)", gate.index(), threshold.db())
            }
            Command::SetWorkMode(mode) => write!(f, "SetWorkMode({})", mode),
            Command::ReadParameter(parameter) => write!(f, "ReadParameter({:?})", parameter),
            other => write!(f, "{}", other.word()),
        }
    }
}

fn put_parameter(out: &mut BytesMut, parameter: Parameter, value: u32) {
    out.put_u16_le(parameter.id());
    out.put_u32_le(value);
}

/// Acknowledgment frame sent by the radar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Command being acknowledged, ACK flag removed
    pub command: CommandWord,
    /// 0 on success
    pub status: u16,
    /// Return values following the status
    pub payload: Bytes,
}

impl Ack {
    pub fn from_frame(frame: &Frame) -> Option<Ack> {
        let Frame::Command { word, payload } = frame else {
            return None;
        };
        if word & ACK_FLAG == 0 || payload.len() < 2 {
            return None;
        }
        let mut payload = payload.clone();
        let status = payload.get_u16_le();
        Some(Ack {
            command: CommandWord::from_primitive(word & !ACK_FLAG),
            status,
            payload,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Build the frame the radar would send for this acknowledgment
    pub fn to_frame(&self) -> Frame {
        let mut payload = BytesMut::with_capacity(2 + self.payload.len());
        payload.put_u16_le(self.status);
        payload.put_slice(&self.payload);
        Frame::Command {
            word: self.command.ack_word(),
            payload: payload.freeze(),
        }
    }
}

/// Decoded return value of a successfully acknowledged command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledged without return values
    Done,
    ConfigOpened { protocol_version: u16, buffer_size: u16 },
    FirmwareVersion(String),
    CalibrationProgress(u16),
    Parameter { parameter: Parameter, value: u32 },
}

impl Reply {
    /// Interpret the payload of a successful `ack` to `command`.
    pub fn parse(command: &Command, ack: &Ack) -> Result<Reply, LdError> {
        let mut payload = ack.payload.clone();
        let need = |expected: usize| {
            if ack.payload.len() < expected {
                Err(LdError::InsufficientData {
                    expected,
                    actual: ack.payload.len(),
                })
            } else {
                Ok(())
            }
        };

        match command {
            Command::EnterConfig => {
                if payload.remaining() < 4 {
                    return Ok(Reply::Done);
                }
                Ok(Reply::ConfigOpened {
                    protocol_version: payload.get_u16_le(),
                    buffer_size: payload.get_u16_le(),
                })
            }
            Command::QueryFirmwareVersion => {
                need(2)?;
                let len = payload.get_u16_le() as usize;
                if payload.remaining() < len {
                    return Err(LdError::InvalidReply {
                        command: command.word(),
                        message: format!("version string of {} bytes, {} present", len, payload.remaining()),
                    });
                }
                let version = String::from_utf8_lossy(&payload[..len])
                    .trim_end_matches('\0')
                    .trim()
                    .to_string();
                Ok(Reply::FirmwareVersion(version))
            }
            Command::QueryCalibrationProgress => {
                need(2)?;
                Ok(Reply::CalibrationProgress(payload.get_u16_le()))
            }
            Command::ReadParameter(parameter) => {
                need(4)?;
                Ok(Reply::Parameter {
                    parameter: *parameter,
                    value: payload.get_u32_le(),
                })
            }
            _ => Ok(Reply::Done),
        }
    }
}
