//! Tokio host for a [`Radar`].
//!
//! [`spawn`] moves the driver and the serial stream into a task and returns a
//! cloneable [`RadarHandle`] for requests plus a channel of [`Event`]s. The
//! task feeds received bytes, ticks [`Radar::poll`] every
//! `RadarConfig::poll_interval` and writes queued frames back out.

use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::command::{Parameter, Reply};
use crate::config::RadarConfig;
use crate::device::{DeviceMode, Event, Operation, Publisher, Radar, Ticket};
use crate::error::{LdError, Result};
use crate::reading::Reading;

const READ_BUFFER_SIZE: usize = 256;

/// Point-in-time view of the driver
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub mode: DeviceMode,
    pub connected: bool,
    pub reading: Reading,
}

enum Request {
    Submit {
        operation: Operation,
        reply: oneshot::Sender<Result<Reply>>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Shutdown,
}

/// Sends requests to the host task.
#[derive(Debug, Clone)]
pub struct RadarHandle {
    requests: mpsc::UnboundedSender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Submit { operation, .. } => write!(f, "Submit({:?})", operation),
            Request::Snapshot { .. } => write!(f, "Snapshot"),
            Request::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl RadarHandle {
    /// Run `operation` and wait for its final result.
    pub async fn submit(&self, operation: Operation) -> Result<Reply> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Submit { operation, reply })
            .map_err(|_| LdError::ChannelClosed)?;
        response.await.map_err(|_| LdError::ChannelClosed)?
    }

    pub async fn set_max_distance(&self, meters: f32) -> Result<Reply> {
        self.submit(Operation::SetMaxDistance(meters)).await
    }

    pub async fn set_timeout(&self, seconds: u32) -> Result<Reply> {
        self.submit(Operation::SetTimeout(seconds)).await
    }

    pub async fn set_gate_motion_threshold(&self, gate: u8, db: f32) -> Result<Reply> {
        self.submit(Operation::SetGateMotionThreshold { gate, db }).await
    }

    pub async fn set_gate_micromotion_threshold(&self, gate: u8, db: f32) -> Result<Reply> {
        self.submit(Operation::SetGateMicromotionThreshold { gate, db }).await
    }

    /// Resolves when the calibration run has finished
    pub async fn calibrate(&self) -> Result<Reply> {
        self.submit(Operation::Calibrate).await
    }

    pub async fn enable_auto_gain(&self) -> Result<Reply> {
        self.submit(Operation::EnableAutoGain).await
    }

    pub async fn save_config(&self) -> Result<Reply> {
        self.submit(Operation::SaveConfig).await
    }

    pub async fn set_engineering_mode(&self, enabled: bool) -> Result<Reply> {
        self.submit(Operation::SetEngineeringMode(enabled)).await
    }

    pub async fn query_firmware_version(&self) -> Result<Reply> {
        self.submit(Operation::QueryFirmwareVersion).await
    }

    pub async fn read_parameter(&self, parameter: Parameter) -> Result<Reply> {
        self.submit(Operation::ReadParameter(parameter)).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Snapshot { reply })
            .map_err(|_| LdError::ChannelClosed)?;
        response.await.map_err(|_| LdError::ChannelClosed)
    }

    /// Ask the host task to stop. Pending requests resolve with `ChannelClosed`.
    pub fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown);
    }
}

impl Publisher for mpsc::UnboundedSender<Event> {
    fn publish(&mut self, event: Event) {
        let _ = self.send(event);
    }
}

/// Routes `CommandFinished` to the waiting handle call, everything else to
/// the event channel.
struct Router<'a> {
    events: &'a mut mpsc::UnboundedSender<Event>,
    pending: &'a mut HashMap<Ticket, oneshot::Sender<Result<Reply>>>,
}

impl Publisher for Router<'_> {
    fn publish(&mut self, event: Event) {
        match event {
            Event::CommandFinished { ticket, command, result } => match self.pending.remove(&ticket) {
                Some(waiter) => {
                    let _ = waiter.send(result);
                }
                None => self.events.publish(Event::CommandFinished { ticket, command, result }),
            },
            other => self.events.publish(other),
        }
    }
}

/// Start the host task for a radar attached to `stream`.
pub fn spawn<S>(
    stream: S,
    config: RadarConfig,
) -> Result<(RadarHandle, mpsc::UnboundedReceiver<Event>, JoinHandle<Result<()>>)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let radar = Radar::new(config, now())?;
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(radar, stream, request_rx, event_tx));
    Ok((RadarHandle { requests: request_tx }, event_rx, task))
}

fn now() -> std::time::Instant {
    time::Instant::now().into_std()
}

async fn run<S>(
    mut radar: Radar,
    stream: S,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut events: mpsc::UnboundedSender<Event>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut ticker = time::interval(radar.config().poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut pending = HashMap::new();

    info!("Radar host started");
    loop {
        tokio::select! {
            read = reader.read(&mut buffer) => {
                let count = read?;
                if count == 0 {
                    info!("Serial stream closed");
                    break;
                }
                radar.feed(&buffer[..count], now());
            }
            request = requests.recv() => match request {
                Some(Request::Submit { operation, reply }) => match radar.submit(operation) {
                    Ok(ticket) => {
                        pending.insert(ticket, reply);
                    }
                    Err(error) => {
                        debug!("Rejected {:?}: {}", operation, error);
                        let _ = reply.send(Err(error));
                    }
                },
                Some(Request::Snapshot { reply }) => {
                    let _ = reply.send(Snapshot {
                        mode: radar.mode(),
                        connected: radar.is_connected(),
                        reading: radar.reading().clone(),
                    });
                }
                Some(Request::Shutdown) | None => break,
            },
            _ = ticker.tick() => radar.poll(now()),
        }

        let mut wrote = false;
        while let Some(frame) = radar.poll_transmit() {
            writer.write_all(&frame).await?;
            wrote = true;
        }
        if wrote {
            writer.flush().await?;
        }

        radar.dispatch(&mut Router {
            events: &mut events,
            pending: &mut pending,
        });
    }

    info!("Radar host stopped");
    Ok(())
}
