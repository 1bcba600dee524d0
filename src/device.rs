//! Sans-IO driver for one HLK-LD2402 radar.
//!
//! [`Radar`] owns the frame decoder, the command engine and the current
//! [`Reading`]. The caller moves bytes in and out of it:
//!
//! - [`Radar::feed`] with whatever the UART delivered
//! - [`Radar::poll`] regularly, to expire deadlines and drive probes and
//!   calibration polling
//! - [`Radar::poll_transmit`] for frames to write to the UART
//! - [`Radar::next_event`] or [`Radar::dispatch`] for the resulting events
//!
//! [`Radar::service`] does all four against a blocking [`Transport`], and
//! [`crate::host`] runs the same loop on tokio.

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;
use strum_macros::Display;
use tracing::{debug, info, trace, warn};

use crate::codec::{Decoded, FrameDecoder};
use crate::command::{
    Ack, CalibrationFactors, Command, CommandWord, Gate, MaxDistance, Parameter, Reply, Threshold, WorkMode,
};
use crate::config::RadarConfig;
use crate::engine::{CommandEngine, Outcome, Progress, RetryPolicy};
use crate::error::{EncodingError, LdError, Result};
use crate::frame::Frame;
use crate::reading::Reading;
use crate::report::{UnrecognizedReport, decode_report};
use crate::transport::Transport;

const READ_CHUNK: usize = 256;

/// Operating mode as observed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DeviceMode {
    Disconnected,
    Normal,
    #[strum(to_string = "Config")]
    ConfigMode,
    Calibrating,
    Engineering,
}

/// Handle identifying one submitted operation in [`Event::CommandFinished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u32);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// User-level operations, with arguments in user units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    /// Meters, 0.7..=10.0
    SetMaxDistance(f32),
    /// Seconds, 0..=65535
    SetTimeout(u32),
    SetGateMotionThreshold { gate: u8, db: f32 },
    SetGateMicromotionThreshold { gate: u8, db: f32 },
    Calibrate,
    EnableAutoGain,
    SaveConfig,
    SetEngineeringMode(bool),
    QueryFirmwareVersion,
    ReadParameter(Parameter),
}

impl Operation {
    /// Validate the arguments and build the command to send.
    pub fn to_command(&self, factors: CalibrationFactors) -> std::result::Result<Command, EncodingError> {
        let command = match *self {
            Operation::SetMaxDistance(meters) => Command::SetMaxDistance(MaxDistance::from_meters(meters)?),
            Operation::SetTimeout(seconds) => {
                Command::SetTimeout(u16::try_from(seconds).map_err(|_| EncodingError::TimeoutOutOfRange(seconds))?)
            }
            Operation::SetGateMotionThreshold { gate, db } => Command::SetGateMotionThreshold {
                gate: Gate::new(gate)?,
                threshold: Threshold::from_db(db)?,
            },
            Operation::SetGateMicromotionThreshold { gate, db } => Command::SetGateMicromotionThreshold {
                gate: Gate::new(gate)?,
                threshold: Threshold::from_db(db)?,
            },
            Operation::Calibrate => Command::StartCalibration(factors),
            Operation::EnableAutoGain => Command::EnableAutoGain,
            Operation::SaveConfig => Command::SaveConfig,
            Operation::SetEngineeringMode(enabled) => Command::SetWorkMode(if enabled {
                WorkMode::Engineering
            } else {
                WorkMode::Normal
            }),
            Operation::QueryFirmwareVersion => Command::QueryFirmwareVersion,
            Operation::ReadParameter(parameter) => Command::ReadParameter(parameter),
        };
        Ok(command)
    }
}

/// Everything the driver reports to its publisher.
#[derive(Debug)]
pub enum Event {
    Reading(Reading),
    FirmwareVersion(String),
    CalibrationProgress(u8),
    CalibrationComplete,
    /// Unsolicited notice that auto gain adjustment finished
    AutoGainComplete,
    ModeChanged {
        from: DeviceMode,
        to: DeviceMode,
    },
    Connected,
    ConnectionLost,
    /// Final result of a submitted operation, exactly once per ticket
    CommandFinished {
        ticket: Ticket,
        command: CommandWord,
        result: Result<Reply>,
    },
    UnrecognizedReport(UnrecognizedReport),
}

/// Receives driver events.
pub trait Publisher {
    fn publish(&mut self, event: Event);
}

impl Publisher for Vec<Event> {
    fn publish(&mut self, event: Event) {
        self.push(event);
    }
}

/// What the transaction in flight belongs to.
#[derive(Debug, Clone, Copy)]
enum Purpose {
    Probe,
    Request { ticket: Ticket },
    WorkMode { ticket: Ticket, mode: WorkMode },
    CalibrationStart,
    CalibrationPoll,
    CalibrationFinish,
}

#[derive(Debug)]
struct CalibrationRun {
    ticket: Ticket,
    started: Instant,
    next_poll: Instant,
    failure: Option<LdError>,
}

/// Driver state for one radar.
#[derive(Debug)]
pub struct Radar {
    config: RadarConfig,
    decoder: FrameDecoder,
    engine: CommandEngine,
    mode: DeviceMode,
    work_mode: WorkMode,
    connected: bool,
    reading: Reading,
    purpose: Option<Purpose>,
    calibration: Option<CalibrationRun>,
    outbox: VecDeque<Bytes>,
    events: VecDeque<Event>,
    now: Instant,
    last_rx: Instant,
    next_probe: Option<Instant>,
    consecutive_corrupt: u32,
    next_ticket: u32,
    last_reading_event: Option<Instant>,
}

impl Radar {
    /// Create a driver. `now` is the reference for all later deadlines.
    ///
    /// The radar starts out `Disconnected`; the first [`Radar::poll`] sends
    /// the connection probe.
    pub fn new(config: RadarConfig, now: Instant) -> Result<Self> {
        config.validate()?;
        let engine = CommandEngine::new(RetryPolicy {
            timeout: config.command_timeout,
            retries: config.command_retries,
        });
        Ok(Self {
            config,
            decoder: FrameDecoder::new(),
            engine,
            mode: DeviceMode::Disconnected,
            work_mode: WorkMode::Normal,
            connected: false,
            reading: Reading::default(),
            purpose: None,
            calibration: None,
            outbox: VecDeque::new(),
            events: VecDeque::new(),
            now,
            last_rx: now,
            next_probe: None,
            consecutive_corrupt: 0,
            next_ticket: 0,
            last_reading_event: None,
        })
    }

    pub fn config(&self) -> &RadarConfig {
        &self.config
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn reading(&self) -> &Reading {
        &self.reading
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True while an operation, probe or calibration run is in progress
    pub fn is_busy(&self) -> bool {
        self.engine.is_busy() || self.calibration.is_some()
    }

    /// Feed bytes received from the UART.
    pub fn feed(&mut self, bytes: &[u8], now: Instant) {
        self.now = now;
        trace!(bytes = %hex::encode(bytes), "UART read");
        self.decoder.push(bytes);
        loop {
            match self.decoder.decode() {
                Decoded::Frame(frame) => self.handle_frame(frame),
                Decoded::CorruptFrame { discarded } => self.handle_corrupt(discarded),
                Decoded::NeedMoreBytes => break,
            }
        }
    }

    /// Advance timers: acknowledgment deadlines, liveness, reconnection
    /// probes and calibration polling.
    pub fn poll(&mut self, now: Instant) {
        self.now = now;
        let progress = self.engine.poll(now);
        self.handle_progress(progress);

        if self.connected && now.saturating_duration_since(self.last_rx) > self.config.liveness_timeout {
            self.lose_connection("no data received");
        }

        if self.engine.is_busy() {
            return;
        }

        if !self.connected {
            if self.next_probe.is_none_or(|at| now >= at) {
                self.start_probe();
            }
            return;
        }

        let Some(run) = &self.calibration else {
            return;
        };
        if now.saturating_duration_since(run.started) >= self.config.calibration_timeout {
            warn!("Calibration did not finish within {:?}", self.config.calibration_timeout);
            self.finish_calibration(Some(LdError::Timeout {
                command: CommandWord::StartCalibration,
            }));
        } else if now >= run.next_poll {
            if let Err(error) = self.start(&[Command::QueryCalibrationProgress], true, Purpose::CalibrationPoll) {
                self.finish_calibration(Some(error));
            }
        }
    }

    /// Next frame to write to the UART
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        self.outbox.pop_front()
    }

    pub fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Hand every queued event to `publisher`, in order.
    pub fn dispatch<P: Publisher + ?Sized>(&mut self, publisher: &mut P) {
        while let Some(event) = self.events.pop_front() {
            publisher.publish(event);
        }
    }

    /// Drain `transport`, advance timers and flush pending frames.
    pub fn service<T: Transport + ?Sized>(&mut self, transport: &mut T, now: Instant) -> Result<()> {
        let mut buffer = [0u8; READ_CHUNK];
        loop {
            let count = transport.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            self.feed(&buffer[..count], now);
        }
        self.poll(now);
        while let Some(frame) = self.poll_transmit() {
            transport.write(&frame)?;
        }
        Ok(())
    }

    /// Validate and start `operation`.
    ///
    /// Argument errors are reported before connectivity, so nothing is ever
    /// transmitted for an invalid request. The final result arrives as
    /// [`Event::CommandFinished`] with the returned ticket.
    pub fn submit(&mut self, operation: Operation) -> Result<Ticket> {
        let command = operation.to_command(self.config.calibration_factors)?;
        if !self.connected {
            return Err(LdError::Disconnected);
        }
        if self.is_busy() {
            return Err(LdError::Busy);
        }

        let ticket = Ticket(self.next_ticket);
        let (keep_config_open, purpose) = match command {
            Command::StartCalibration(_) => (true, Purpose::CalibrationStart),
            Command::SetWorkMode(mode) => (false, Purpose::WorkMode { ticket, mode }),
            _ => (false, Purpose::Request { ticket }),
        };
        self.start(&[command], keep_config_open, purpose)?;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        debug!("Submitted {} as {}", command, ticket);

        if let Purpose::CalibrationStart = purpose {
            self.reading.calibration_progress = 0;
            self.calibration = Some(CalibrationRun {
                ticket,
                started: self.now,
                next_poll: self.now + self.config.calibration_poll_interval,
                failure: None,
            });
        }
        self.refresh_mode();
        Ok(ticket)
    }

    pub fn set_max_distance(&mut self, meters: f32) -> Result<Ticket> {
        self.submit(Operation::SetMaxDistance(meters))
    }

    pub fn set_timeout(&mut self, seconds: u32) -> Result<Ticket> {
        self.submit(Operation::SetTimeout(seconds))
    }

    pub fn set_gate_motion_threshold(&mut self, gate: u8, db: f32) -> Result<Ticket> {
        self.submit(Operation::SetGateMotionThreshold { gate, db })
    }

    pub fn set_gate_micromotion_threshold(&mut self, gate: u8, db: f32) -> Result<Ticket> {
        self.submit(Operation::SetGateMicromotionThreshold { gate, db })
    }

    /// Start automatic threshold generation. The ticket resolves when the
    /// run ends, after configuration mode has been closed again.
    pub fn calibrate(&mut self) -> Result<Ticket> {
        self.submit(Operation::Calibrate)
    }

    pub fn enable_auto_gain(&mut self) -> Result<Ticket> {
        self.submit(Operation::EnableAutoGain)
    }

    pub fn save_config(&mut self) -> Result<Ticket> {
        self.submit(Operation::SaveConfig)
    }

    pub fn set_engineering_mode(&mut self, enabled: bool) -> Result<Ticket> {
        self.submit(Operation::SetEngineeringMode(enabled))
    }

    pub fn query_firmware_version(&mut self) -> Result<Ticket> {
        self.submit(Operation::QueryFirmwareVersion)
    }

    pub fn read_parameter(&mut self, parameter: Parameter) -> Result<Ticket> {
        self.submit(Operation::ReadParameter(parameter))
    }

    fn start(&mut self, commands: &[Command], keep_config_open: bool, purpose: Purpose) -> Result<()> {
        let frame = self.engine.execute_batch(commands, keep_config_open, self.now)?;
        self.purpose = Some(purpose);
        self.transmit(frame);
        Ok(())
    }

    fn transmit(&mut self, frame: Bytes) {
        trace!(bytes = %hex::encode(&frame), "UART write");
        self.outbox.push_back(frame);
    }

    fn emit(&mut self, event: Event) {
        self.events.push_back(event);
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.last_rx = self.now;
        self.consecutive_corrupt = 0;

        if let Some(ack) = Ack::from_frame(&frame) {
            let progress = self.engine.on_ack(&ack, self.now);
            self.handle_progress(progress);
            return;
        }

        if frame.command_word() == Some(CommandWord::AutoGainComplete) {
            info!("Auto gain adjustment complete");
            self.emit(Event::AutoGainComplete);
            return;
        }

        if !self.connected {
            trace!("Dropping report received while disconnected");
            return;
        }

        match decode_report(&frame, &self.reading) {
            Ok(reading) => {
                self.track_work_mode(&frame);
                self.update_reading(reading)
            }
            Err(report) => {
                debug!("Unrecognized report: {}", report);
                self.emit(Event::UnrecognizedReport(report));
            }
        }
    }

    fn handle_corrupt(&mut self, discarded: usize) {
        if !self.connected {
            trace!("Discarded {} bytes while disconnected", discarded);
            return;
        }
        self.consecutive_corrupt += 1;
        warn!(
            "Discarded {} unframed bytes ({} in a row)",
            discarded, self.consecutive_corrupt
        );
        if self.consecutive_corrupt > self.config.max_consecutive_corrupt {
            self.lose_connection("stream does not resynchronize");
        }
    }

    /// The probe does not read the work mode back, so the report format
    /// decides it: binary frames only come in engineering mode.
    fn track_work_mode(&mut self, frame: &Frame) {
        if self.engine.config_open() || self.calibration.is_some() {
            return;
        }
        let streaming = match frame {
            Frame::Report { .. } => WorkMode::Engineering,
            Frame::Text(_) => WorkMode::Normal,
            Frame::Command { .. } => return,
        };
        if streaming != self.work_mode {
            info!("Radar is reporting in {} work mode", streaming);
            self.work_mode = streaming;
            self.refresh_mode();
        }
    }

    fn update_reading(&mut self, reading: Reading) {
        let distance_only = Reading {
            distance_mm: self.reading.distance_mm,
            ..reading.clone()
        } == self.reading;
        let throttled = distance_only
            && match (self.config.distance_throttle, self.last_reading_event) {
                (Some(window), Some(at)) => self.now.saturating_duration_since(at) < window,
                _ => false,
            };

        self.reading = reading;
        if throttled {
            trace!("Throttled distance update to {} cm", self.reading.distance_cm());
            return;
        }
        self.last_reading_event = Some(self.now);
        debug!("{}", self.reading);
        self.emit(Event::Reading(self.reading.clone()));
    }

    fn handle_progress(&mut self, progress: Progress) {
        match progress {
            Progress::Idle | Progress::Waiting => {}
            Progress::Send(frame) => self.transmit(frame),
            Progress::Done(outcome) => self.complete(outcome),
        }
        self.refresh_mode();
    }

    fn complete(&mut self, outcome: Outcome) {
        let Some(purpose) = self.purpose.take() else {
            return;
        };
        let Outcome { command, result } = outcome;

        match purpose {
            Purpose::Probe => self.finish_probe(result),
            Purpose::Request { ticket } => {
                let result = result.map(first_reply);
                if let Ok(Reply::FirmwareVersion(version)) = &result {
                    self.record_firmware(version.clone());
                }
                self.emit(Event::CommandFinished { ticket, command, result });
            }
            Purpose::WorkMode { ticket, mode } => {
                if result.is_ok() {
                    info!("Radar switched to {} output", mode);
                    self.work_mode = mode;
                }
                self.emit(Event::CommandFinished {
                    ticket,
                    command,
                    result: result.map(first_reply),
                });
            }
            Purpose::CalibrationStart => match result {
                Ok(_) => {
                    info!("Calibration started");
                    self.emit(Event::CalibrationProgress(0));
                }
                Err(error) => {
                    if let Some(run) = self.calibration.take() {
                        self.emit(Event::CommandFinished {
                            ticket: run.ticket,
                            command,
                            result: Err(error),
                        });
                    }
                }
            },
            Purpose::CalibrationPoll => match result.map(first_reply) {
                Ok(Reply::CalibrationProgress(raw)) => {
                    let progress = self.reading.update_calibration_progress(raw);
                    info!("Calibration progress: {}%", progress);
                    self.emit(Event::CalibrationProgress(progress));
                    self.emit(Event::Reading(self.reading.clone()));
                    if progress >= 100 {
                        self.finish_calibration(None);
                    } else if let Some(run) = self.calibration.as_mut() {
                        run.next_poll = self.now + self.config.calibration_poll_interval;
                    }
                }
                Ok(other) => self.finish_calibration(Some(LdError::InvalidReply {
                    command,
                    message: format!("unexpected reply {:?}", other),
                })),
                Err(error) => self.finish_calibration(Some(error)),
            },
            Purpose::CalibrationFinish => {
                let Some(run) = self.calibration.take() else {
                    return;
                };
                let result = match (run.failure, result) {
                    (Some(failure), _) => Err(failure),
                    (None, Err(error)) => Err(error),
                    (None, Ok(_)) => Ok(Reply::Done),
                };
                if result.is_ok() {
                    info!("Calibration complete");
                    self.emit(Event::CalibrationComplete);
                }
                self.emit(Event::CommandFinished {
                    ticket: run.ticket,
                    command: CommandWord::StartCalibration,
                    result,
                });
            }
        }
    }

    /// End the calibration run, closing configuration mode first.
    fn finish_calibration(&mut self, failure: Option<LdError>) {
        if let Some(run) = self.calibration.as_mut() {
            run.failure = failure;
        }
        if self.engine.config_open() {
            if let Err(error) = self.start(&[Command::ExitConfig], false, Purpose::CalibrationFinish) {
                warn!("Cannot close configuration mode after calibration: {}", error);
            } else {
                return;
            }
        }
        self.purpose = Some(Purpose::CalibrationFinish);
        self.complete(Outcome {
            command: CommandWord::DisableConfig,
            result: Ok(Vec::new()),
        });
    }

    fn start_probe(&mut self) {
        let mut commands = vec![Command::QueryFirmwareVersion];
        if self.config.apply_on_connect {
            if let Ok(distance) = MaxDistance::from_meters(self.config.max_distance_m) {
                commands.push(Command::SetMaxDistance(distance));
            }
            commands.push(Command::SetTimeout(self.config.disappear_delay_s));
        }
        debug!("Probing radar");
        if let Err(error) = self.start(&commands, false, Purpose::Probe) {
            warn!("Cannot start probe: {}", error);
            self.next_probe = Some(self.now + self.config.reprobe_interval);
        }
    }

    fn finish_probe(&mut self, result: Result<Vec<Reply>>) {
        match result {
            Ok(replies) => {
                self.connected = true;
                self.work_mode = WorkMode::Normal;
                self.last_rx = self.now;
                self.consecutive_corrupt = 0;
                self.next_probe = None;
                let version = replies.into_iter().find_map(|reply| match reply {
                    Reply::FirmwareVersion(version) => Some(version),
                    _ => None,
                });
                info!(
                    "HLK-LD2402 connected, firmware {}",
                    version.as_deref().unwrap_or("unknown")
                );
                self.emit(Event::Connected);
                if let Some(version) = version {
                    self.record_firmware(version);
                }
            }
            Err(error) => {
                debug!("Probe failed: {}", error);
                self.next_probe = Some(self.now + self.config.reprobe_interval);
            }
        }
    }

    fn record_firmware(&mut self, version: String) {
        self.reading.firmware_version = Some(version.clone());
        self.emit(Event::FirmwareVersion(version));
    }

    fn lose_connection(&mut self, reason: &str) {
        warn!("Lost connection to radar: {}", reason);
        self.connected = false;
        self.decoder.clear();
        self.consecutive_corrupt = 0;

        if let Some(outcome) = self.engine.abort(LdError::Disconnected) {
            match self.purpose.take() {
                Some(Purpose::Request { ticket }) | Some(Purpose::WorkMode { ticket, .. }) => {
                    self.emit(Event::CommandFinished {
                        ticket,
                        command: outcome.command,
                        result: Err(LdError::Disconnected),
                    });
                }
                _ => {}
            }
        }
        if let Some(run) = self.calibration.take() {
            self.emit(Event::CommandFinished {
                ticket: run.ticket,
                command: CommandWord::StartCalibration,
                result: Err(LdError::Disconnected),
            });
        }

        self.work_mode = WorkMode::Normal;
        self.next_probe = Some(self.now + self.config.reprobe_interval);
        self.emit(Event::ConnectionLost);
        self.refresh_mode();
    }

    fn refresh_mode(&mut self) {
        let mode = if !self.connected {
            DeviceMode::Disconnected
        } else if self.calibration.is_some() {
            DeviceMode::Calibrating
        } else if self.engine.config_open() {
            DeviceMode::ConfigMode
        } else {
            match self.work_mode {
                WorkMode::Normal => DeviceMode::Normal,
                WorkMode::Engineering => DeviceMode::Engineering,
            }
        };
        if mode != self.mode {
            info!("Mode {} -> {}", self.mode, mode);
            let from = std::mem::replace(&mut self.mode, mode);
            self.emit(Event::ModeChanged { from, to: mode });
        }
    }
}

fn first_reply(replies: Vec<Reply>) -> Reply {
    replies.into_iter().next().unwrap_or(Reply::Done)
}
