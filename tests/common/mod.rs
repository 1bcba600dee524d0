//! Common test utilities and shared imports

// Shared by several test files; not every item is used in each of them
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use hex;
#[allow(unused_imports)]
pub use ld2402::codec::{Decoded, FrameDecoder, decode_frame};
#[allow(unused_imports)]
pub use ld2402::command::{
    Ack, CalibrationFactors, Command, CommandWord, Gate, MaxDistance, Parameter, Reply, Threshold, WorkMode,
};
#[allow(unused_imports)]
pub use ld2402::device::Operation;
#[allow(unused_imports)]
pub use ld2402::frame::Frame;
#[allow(unused_imports)]
pub use ld2402::report::{Detection, Report, UnrecognizedReport};
#[allow(unused_imports)]
pub use ld2402::{DeviceMode, EncodingError, Event, LdError, Radar, RadarConfig, Reading};
#[allow(unused_imports)]
pub use std::time::{Duration, Instant};

use std::collections::VecDeque;

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// Route driver logs to the test output; `RUST_LOG=ld2402=trace` shows frames
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Plays the radar side of the command protocol.
#[allow(dead_code)]
#[derive(Debug)]
pub struct SimulatedRadar {
    /// Every command received, in order
    pub received: Vec<Command>,
    /// Commands that are never acknowledged
    pub silent: Vec<CommandWord>,
    /// Commands acknowledged with a failure status
    pub reject: Vec<CommandWord>,
    /// Answers to successive progress queries; the last one repeats
    pub progress: VecDeque<u16>,
    pub firmware: String,
    pub parameter_value: u32,
}

impl Default for SimulatedRadar {
    fn default() -> Self {
        Self {
            received: Vec::new(),
            silent: Vec::new(),
            reject: Vec::new(),
            progress: VecDeque::from([100]),
            firmware: "v3.3.5".to_string(),
            parameter_value: 50,
        }
    }
}

#[allow(dead_code)]
impl SimulatedRadar {
    /// Acknowledgment bytes for `command`, or `None` when it stays silent
    pub fn reply(&mut self, command: &Command) -> Option<Bytes> {
        let word = command.word();
        if self.silent.contains(&word) {
            return None;
        }
        let status = if self.reject.contains(&word) { 1 } else { 0 };
        let payload = match command {
            Command::EnterConfig => Bytes::from_static(&[0x01, 0x00, 0x40, 0x00]),
            Command::QueryFirmwareVersion => {
                let mut payload = (self.firmware.len() as u16).to_le_bytes().to_vec();
                payload.extend_from_slice(self.firmware.as_bytes());
                Bytes::from(payload)
            }
            Command::QueryCalibrationProgress => {
                let progress = if self.progress.len() > 1 {
                    self.progress.pop_front().unwrap_or(100)
                } else {
                    self.progress.front().copied().unwrap_or(100)
                };
                Bytes::copy_from_slice(&progress.to_le_bytes())
            }
            Command::ReadParameter(_) => Bytes::copy_from_slice(&self.parameter_value.to_le_bytes()),
            _ => Bytes::new(),
        };
        let ack = Ack {
            command: word,
            status,
            payload,
        };
        Some(ack.to_frame().encode().expect("Failed to encode ack"))
    }

    /// Receive everything the driver queued, acknowledging as configured,
    /// until the driver has nothing more to send.
    pub fn answer(&mut self, radar: &mut Radar, now: Instant) {
        while let Some(bytes) = radar.poll_transmit() {
            let frame = decode_frame(&bytes).expect("driver sent a malformed frame");
            let command = Command::from_frame(&frame).expect("driver sent an unknown command");
            self.received.push(command);
            if let Some(reply) = self.reply(&command) {
                radar.feed(&reply, now);
            }
        }
    }

    pub fn take_received(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.received)
    }
}

/// Build a driver and run its connection probe against `sim`.
#[allow(dead_code)]
pub fn connected_radar(config: RadarConfig, sim: &mut SimulatedRadar, now: Instant) -> Radar {
    let mut radar = Radar::new(config, now).expect("valid config");
    radar.poll(now);
    sim.answer(&mut radar, now);
    assert!(radar.is_connected(), "probe did not connect");
    drain_events(&mut radar);
    sim.received.clear();
    radar
}

#[allow(dead_code)]
pub fn drain_events(radar: &mut Radar) -> Vec<Event> {
    let mut events = Vec::new();
    radar.dispatch(&mut events);
    events
}

#[allow(dead_code)]
pub fn mode_changes(events: &[Event]) -> Vec<(DeviceMode, DeviceMode)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::ModeChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

#[allow(dead_code)]
pub fn finished(events: &[Event]) -> Vec<&Result<Reply, LdError>> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::CommandFinished { result, .. } => Some(result),
            _ => None,
        })
        .collect()
}

/// Encoded data frame for a report
#[allow(dead_code)]
pub fn data_frame(detection: Detection, distance_cm: u16, motion: &[u32], micro: &[u32]) -> Bytes {
    Report::Data {
        detection,
        distance_cm,
        motion_energy: motion.to_vec(),
        micro_energy: micro.to_vec(),
    }
    .to_frame()
    .encode()
    .expect("Failed to encode data frame")
}
