//! Driver configuration, passed once to [`Radar::new`](crate::Radar::new).

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::command::{CalibrationFactors, MaxDistance};
use crate::constants::MAX_CONFIG_DURATION;
use crate::error::{LdError, Result};

/// Settings applied to the radar on connect and the protocol timing knobs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RadarConfig {
    /// Maximum detection distance in meters (0.7..=10.0)
    pub max_distance_m: f32,
    /// Seconds presence is held after the target leaves
    pub disappear_delay_s: u16,
    /// Write `max_distance_m` and `disappear_delay_s` every time the radar (re)connects
    pub apply_on_connect: bool,

    /// How long to wait for each acknowledgment
    pub command_timeout: Duration,
    /// Retransmissions of an unacknowledged frame before giving up
    pub command_retries: u8,

    /// Silence after which the radar is considered gone
    pub liveness_timeout: Duration,
    /// Delay between reconnection probes
    pub reprobe_interval: Duration,
    /// Corrupt frames tolerated in a row before the link is considered lost
    pub max_consecutive_corrupt: u32,

    /// Interval between calibration progress queries
    pub calibration_poll_interval: Duration,
    /// Give up on a calibration run after this long
    pub calibration_timeout: Duration,
    pub calibration_factors: CalibrationFactors,

    /// Minimum time between reading events that only move the distance
    pub distance_throttle: Option<Duration>,

    /// Tick period of the async host loop
    pub poll_interval: Duration,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            max_distance_m: 5.0,
            disappear_delay_s: 5,
            apply_on_connect: true,
            command_timeout: Duration::from_secs(1),
            command_retries: 1,
            liveness_timeout: Duration::from_secs(5),
            reprobe_interval: Duration::from_secs(2),
            max_consecutive_corrupt: 8,
            calibration_poll_interval: Duration::from_secs(1),
            calibration_timeout: Duration::from_secs(30),
            calibration_factors: CalibrationFactors::default(),
            distance_throttle: None,
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl RadarConfig {
    pub fn with_max_distance(mut self, meters: f32) -> Self {
        self.max_distance_m = meters;
        self
    }

    pub fn with_disappear_delay(mut self, seconds: u16) -> Self {
        self.disappear_delay_s = seconds;
        self
    }

    pub fn with_apply_on_connect(mut self, apply: bool) -> Self {
        self.apply_on_connect = apply;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration, retries: u8) -> Self {
        self.command_timeout = timeout;
        self.command_retries = retries;
        self
    }

    pub fn with_liveness(mut self, timeout: Duration, reprobe_interval: Duration) -> Self {
        self.liveness_timeout = timeout;
        self.reprobe_interval = reprobe_interval;
        self
    }

    pub fn with_calibration(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.calibration_poll_interval = poll_interval;
        self.calibration_timeout = timeout;
        self
    }

    pub fn with_distance_throttle(mut self, throttle: Duration) -> Self {
        self.distance_throttle = Some(throttle);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Check the settings before the driver is built
    pub fn validate(&self) -> Result<()> {
        MaxDistance::from_meters(self.max_distance_m)?;
        let durations = [
            ("command_timeout", Some(self.command_timeout)),
            ("liveness_timeout", Some(self.liveness_timeout)),
            ("reprobe_interval", Some(self.reprobe_interval)),
            ("calibration_poll_interval", Some(self.calibration_poll_interval)),
            ("calibration_timeout", Some(self.calibration_timeout)),
            ("distance_throttle", self.distance_throttle),
            ("poll_interval", Some(self.poll_interval)),
        ];
        for (name, duration) in durations {
            if duration.is_some_and(|duration| duration > MAX_CONFIG_DURATION) {
                return Err(LdError::InvalidConfig(format!(
                    "{} must not exceed {:?}",
                    name, MAX_CONFIG_DURATION
                )));
            }
        }
        if self.command_timeout.is_zero() {
            return Err(LdError::InvalidConfig("command_timeout must be non-zero".to_string()));
        }
        if self.liveness_timeout <= self.command_timeout {
            return Err(LdError::InvalidConfig(format!(
                "liveness_timeout ({:?}) must exceed command_timeout ({:?})",
                self.liveness_timeout, self.command_timeout
            )));
        }
        if self.poll_interval.is_zero() || self.calibration_poll_interval.is_zero() {
            return Err(LdError::InvalidConfig("poll intervals must be non-zero".to_string()));
        }
        if self.max_consecutive_corrupt == 0 {
            return Err(LdError::InvalidConfig(
                "max_consecutive_corrupt must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
