use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;
use thiserror::Error;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::command::CommandWord;
use crate::constants::*;
use crate::frame::Frame;
use crate::reading::Reading;

/// Target state byte at the start of a data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Detection {
    #[strum(to_string = "no target")]
    NoTarget = 0x00,
    #[strum(to_string = "movement")]
    Movement = 0x01,
    #[strum(to_string = "micromovement")]
    Micromovement = 0x02,
}

/// Fixed part of a data frame body (3 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ReportHeaderRaw {
    pub detection: u8,
    pub distance_cm: U16, // Centimeters
}

/// A decoded telemetry report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// `distance:<cm>` line; the radar prints one decimal, kept here as millimeters
    Distance { distance_mm: u32 },
    /// `OFF` line
    NoTarget,
    /// Binary data frame. Energies cover gates from 0 upwards; gates beyond
    /// the end of each list were not reported.
    Data {
        detection: Detection,
        distance_cm: u16,
        motion_energy: Vec<u32>,
        micro_energy: Vec<u32>,
    },
}

/// A valid frame whose content is not a telemetry report this crate knows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnrecognizedReport {
    #[error("Unknown text report {0:?}")]
    Text(String),

    #[error("Unknown detection code {0:#04x}")]
    Detection(u8),

    #[error("Malformed data frame body of {0} bytes")]
    Malformed(usize),

    #[error("Command frame {0} is not a report")]
    NotAReport(CommandWord),
}

impl Report {
    pub fn parse(frame: &Frame) -> Result<Report, UnrecognizedReport> {
        match frame {
            Frame::Text(line) => parse_line(line),
            Frame::Report { body } => parse_data(body),
            Frame::Command { .. } => Err(UnrecognizedReport::NotAReport(
                frame.command_word().unwrap_or(CommandWord::Unknown(0xFFFF)),
            )),
        }
    }

    /// Build the data frame the radar would send for this report.
    ///
    /// Text reports are returned as text frames.
    pub fn to_frame(&self) -> Frame {
        match self {
            Report::Distance { distance_mm } => Frame::Text(match distance_mm % 10 {
                0 => format!("{}{}", DISTANCE_LINE_PREFIX, distance_mm / 10),
                tenths => format!("{}{}.{}", DISTANCE_LINE_PREFIX, distance_mm / 10, tenths),
            }),
            Report::NoTarget => Frame::Text(NO_TARGET_LINE.to_string()),
            Report::Data {
                detection,
                distance_cm,
                motion_energy,
                micro_energy,
            } => {
                let header = ReportHeaderRaw {
                    detection: (*detection).into(),
                    distance_cm: U16::new(*distance_cm),
                };
                let mut body =
                    Vec::with_capacity(REPORT_HEADER_SIZE + ENERGY_SIZE * (motion_energy.len() + micro_energy.len()));
                body.extend_from_slice(header.as_bytes());
                for energy in motion_energy.iter().chain(micro_energy) {
                    body.extend_from_slice(U32::new(*energy).as_bytes());
                }
                Frame::Report { body: body.into() }
            }
        }
    }
}

fn parse_line(line: &str) -> Result<Report, UnrecognizedReport> {
    if line == NO_TARGET_LINE {
        return Ok(Report::NoTarget);
    }
    let value = line
        .strip_prefix(DISTANCE_LINE_PREFIX)
        .ok_or_else(|| UnrecognizedReport::Text(line.to_string()))?
        .trim();

    let distance_mm = match value.parse::<u16>() {
        Ok(distance) => distance as u32 * 10,
        Err(_) => {
            let distance: f64 = value.parse().map_err(|_| UnrecognizedReport::Text(line.to_string()))?;
            if !(0.0..=u16::MAX as f64).contains(&distance) {
                return Err(UnrecognizedReport::Text(line.to_string()));
            }
            (distance * 10.0).round() as u32
        }
    };
    Ok(Report::Distance { distance_mm })
}

fn parse_data(body: &[u8]) -> Result<Report, UnrecognizedReport> {
    let (header, rest) =
        ReportHeaderRaw::ref_from_prefix(body).map_err(|_| UnrecognizedReport::Malformed(body.len()))?;
    let energies = <[U32]>::ref_from_bytes(rest).map_err(|_| UnrecognizedReport::Malformed(body.len()))?;
    let detection =
        Detection::try_from(header.detection).map_err(|_| UnrecognizedReport::Detection(header.detection))?;

    let motion_count = energies.len().min(GATE_COUNT);
    let micro_count = (energies.len() - motion_count).min(GATE_COUNT);
    let motion_energy = energies[..motion_count].iter().map(|e| e.get()).collect();
    let micro_energy = energies[motion_count..motion_count + micro_count]
        .iter()
        .map(|e| e.get())
        .collect();

    Ok(Report::Data {
        detection,
        distance_cm: header.distance_cm.get(),
        motion_energy,
        micro_energy,
    })
}

/// Decode a report frame on top of the `prior` reading.
pub fn decode_report(frame: &Frame, prior: &Reading) -> Result<Reading, UnrecognizedReport> {
    let report = Report::parse(frame)?;
    let mut reading = prior.clone();
    reading.apply(&report);
    Ok(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_distance_line() {
        let frame = Frame::Text("distance:150".to_string());
        assert_eq!(Report::parse(&frame), Ok(Report::Distance { distance_mm: 1500 }));
        let frame = Frame::Text("distance:87.6".to_string());
        assert_eq!(Report::parse(&frame), Ok(Report::Distance { distance_mm: 876 }));
        let frame = Frame::Text("distance:87.4".to_string());
        assert_eq!(Report::parse(&frame), Ok(Report::Distance { distance_mm: 874 }));
    }

    #[test]
    fn test_fractional_distance_line_is_reproduced() {
        let report = Report::Distance { distance_mm: 876 };
        assert_eq!(report.to_frame(), Frame::Text("distance:87.6".to_string()));
        assert_eq!(
            Report::Distance { distance_mm: 2300 }.to_frame(),
            Frame::Text("distance:230".to_string())
        );
    }

    #[test]
    fn test_unknown_line() {
        let frame = Frame::Text("hello".to_string());
        assert_eq!(
            Report::parse(&frame),
            Err(UnrecognizedReport::Text("hello".to_string()))
        );
        let frame = Frame::Text("distance:-3".to_string());
        assert!(Report::parse(&frame).is_err());
    }

    #[test]
    fn test_minimal_data_frame() {
        let frame = Frame::Report {
            body: Bytes::from_static(&[0x01, 0x96, 0x00]),
        };
        assert_eq!(
            Report::parse(&frame),
            Ok(Report::Data {
                detection: Detection::Movement,
                distance_cm: 150,
                motion_energy: vec![],
                micro_energy: vec![],
            })
        );
    }

    #[test]
    fn test_ragged_energy_section() {
        let frame = Frame::Report {
            body: Bytes::from_static(&[0x01, 0x96, 0x00, 0x01, 0x02]),
        };
        assert_eq!(Report::parse(&frame), Err(UnrecognizedReport::Malformed(5)));
    }

    #[test]
    fn test_unknown_detection_code() {
        let frame = Frame::Report {
            body: Bytes::from_static(&[0x07, 0x00, 0x00]),
        };
        assert_eq!(Report::parse(&frame), Err(UnrecognizedReport::Detection(0x07)));
    }

    #[test]
    fn test_full_engineering_frame() {
        let report = Report::Data {
            detection: Detection::Micromovement,
            distance_cm: 321,
            motion_energy: (0..14).map(|g| g * 100).collect(),
            micro_energy: (0..14).map(|g| g * 10).collect(),
        };
        let frame = report.to_frame();
        let reading = decode_report(&frame, &Reading::default()).unwrap();
        assert!(reading.presence && reading.micromovement && !reading.movement);
        assert_eq!(reading.gate_energy[13], 1300);
        assert_eq!(reading.micro_gate_energy[7], 70);
    }
}
