use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::command::Gate;
use crate::constants::GATE_COUNT;
use crate::report::{Detection, Report};

/// Convert a raw linear gate energy to dB
pub fn energy_db(raw: u32) -> f32 {
    if raw == 0 {
        return 0.0;
    }
    (10.0 * (raw as f64).log10()) as f32
}

/// Latest known state of the radar, assembled from telemetry and queries.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    pub presence: bool,
    pub movement: bool,
    pub micromovement: bool,
    /// Target distance in millimeters
    pub distance_mm: u32,
    /// Raw motion energy per gate
    pub gate_energy: [u32; GATE_COUNT],
    /// Raw micromotion energy per gate (engineering mode only)
    pub micro_gate_energy: [u32; GATE_COUNT],
    /// Threshold generation progress in percent
    pub calibration_progress: u8,
    pub firmware_version: Option<String>,
}

impl Reading {
    /// Merge a decoded report into this reading.
    ///
    /// Fields the report does not carry keep their current values.
    pub fn apply(&mut self, report: &Report) {
        match report {
            Report::Distance { distance_mm } => {
                self.presence = true;
                self.distance_mm = *distance_mm;
            }
            Report::NoTarget => {
                self.presence = false;
                self.movement = false;
                self.micromovement = false;
            }
            Report::Data {
                detection,
                distance_cm,
                motion_energy,
                micro_energy,
            } => {
                self.presence = *detection != Detection::NoTarget;
                self.movement = *detection == Detection::Movement;
                self.micromovement = *detection == Detection::Micromovement;
                self.distance_mm = *distance_cm as u32 * 10;
                for (slot, energy) in self.gate_energy.iter_mut().zip(motion_energy) {
                    *slot = *energy;
                }
                for (slot, energy) in self.micro_gate_energy.iter_mut().zip(micro_energy) {
                    *slot = *energy;
                }
            }
        }
    }

    pub fn distance_cm(&self) -> f32 {
        self.distance_mm as f32 / 10.0
    }

    pub fn distance_m(&self) -> f32 {
        self.distance_mm as f32 / 1000.0
    }

    pub fn gate_energy_db(&self, gate: Gate) -> f32 {
        energy_db(self.gate_energy[gate.index() as usize])
    }

    pub fn micro_gate_energy_db(&self, gate: Gate) -> f32 {
        energy_db(self.micro_gate_energy[gate.index() as usize])
    }

    /// Record threshold generation progress, never moving backwards
    pub fn update_calibration_progress(&mut self, progress: u16) -> u8 {
        let progress = progress.min(100) as u8;
        self.calibration_progress = self.calibration_progress.max(progress);
        self.calibration_progress
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Presence: {}, Movement: {}, Micromovement: {}, Distance: {} cm",
            self.presence,
            self.movement,
            self.micromovement,
            self.distance_cm()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_db() {
        assert_eq!(energy_db(0), 0.0);
        assert_eq!(energy_db(1), 0.0);
        assert!((energy_db(1000) - 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_no_target_clears_flags_and_keeps_distance() {
        let mut reading = Reading::default();
        reading.apply(&Report::Distance { distance_mm: 2300 });
        assert!(reading.presence);
        reading.apply(&Report::NoTarget);
        assert!(!reading.presence && !reading.movement && !reading.micromovement);
        assert_eq!(reading.distance_mm, 2300);
    }

    #[test]
    fn test_distance_keeps_tenths() {
        let mut reading = Reading::default();
        reading.apply(&Report::Distance { distance_mm: 876 });
        assert_eq!(reading.distance_cm(), 87.6);
        assert!((reading.distance_m() - 0.876).abs() < 1e-6);
        assert_eq!(reading.to_string(), "Presence: true, Movement: false, Micromovement: false, Distance: 87.6 cm");
    }

    #[test]
    fn test_calibration_progress_is_monotonic() {
        let mut reading = Reading::default();
        assert_eq!(reading.update_calibration_progress(40), 40);
        assert_eq!(reading.update_calibration_progress(20), 40);
        assert_eq!(reading.update_calibration_progress(250), 100);
    }
}
