//! Command/acknowledgment sequencing.
//!
//! The engine never touches the serial port. It hands back the frames to
//! transmit and is driven by [`CommandEngine::on_ack`] when an acknowledgment
//! arrives and by [`CommandEngine::poll`] to expire deadlines.

use bytes::Bytes;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::command::{Ack, Command, CommandWord, Reply};
use crate::error::{EncodingError, LdError, Result};

/// Acknowledgment deadline and retransmission budget for each step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retries: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            retries: 1,
        }
    }
}

/// A finished transaction.
#[derive(Debug)]
pub struct Outcome {
    /// The command the transaction was started for (not the bracket around it)
    pub command: CommandWord,
    /// Replies of the non-bracket steps, in order
    pub result: Result<Vec<Reply>>,
}

/// What the caller has to do after feeding the engine.
#[derive(Debug)]
pub enum Progress {
    /// No transaction
    Idle,
    /// Still waiting for an acknowledgment
    Waiting,
    /// Transmit this frame; the transaction continues
    Send(Bytes),
    /// The transaction resolved
    Done(Outcome),
}

#[derive(Debug)]
struct Step {
    command: Command,
    frame: Bytes,
}

impl Step {
    fn new(command: Command) -> std::result::Result<Self, EncodingError> {
        Ok(Step {
            frame: command.encode()?,
            command,
        })
    }
}

#[derive(Debug)]
struct Transaction {
    label: CommandWord,
    current: Step,
    steps: VecDeque<Step>,
    deadline: Instant,
    retransmits: u8,
    opened_config: bool,
    replies: Vec<Reply>,
    /// Set while closing configuration mode after a failed step
    failure: Option<LdError>,
}

/// Duplicate acknowledgments still expected for a retransmitted step
#[derive(Debug, Clone, Copy)]
struct StaleAcks {
    command: CommandWord,
    remaining: u8,
    until: Instant,
}

/// Runs one command transaction at a time.
#[derive(Debug)]
pub struct CommandEngine {
    policy: RetryPolicy,
    config_open: bool,
    active: Option<Transaction>,
    stale: Option<StaleAcks>,
}

impl CommandEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            config_open: false,
            active: None,
            stale: None,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Whether the radar is currently in configuration mode as far as the
    /// acknowledged bracket commands tell
    pub fn config_open(&self) -> bool {
        self.config_open
    }

    /// Step currently waiting for its acknowledgment
    pub fn pending_command(&self) -> Option<&Command> {
        self.active.as_ref().map(|tx| &tx.current.command)
    }

    /// Start a transaction for a single command.
    ///
    /// Returns the first frame to transmit.
    pub fn execute(&mut self, command: Command, now: Instant) -> Result<Bytes> {
        self.execute_batch(&[command], false, now)
    }

    /// Start a transaction running `commands` back to back.
    ///
    /// When any of them needs configuration mode and it is not open yet, the
    /// batch is wrapped in enter/exit configuration. With `keep_config_open`
    /// the closing exit is left out.
    pub fn execute_batch(&mut self, commands: &[Command], keep_config_open: bool, now: Instant) -> Result<Bytes> {
        if self.active.is_some() {
            return Err(LdError::Busy);
        }
        let label = commands
            .iter()
            .find(|command| !command.is_bracket())
            .or(commands.first())
            .map(Command::word)
            .ok_or_else(|| LdError::InvalidConfig("empty command batch".to_string()))?;

        let bracket = !self.config_open && commands.iter().any(Command::requires_config);
        let mut plan = Vec::with_capacity(commands.len() + 2);
        if bracket {
            plan.push(Command::EnterConfig);
        }
        plan.extend_from_slice(commands);
        if bracket && !keep_config_open {
            plan.push(Command::ExitConfig);
        }

        let mut steps = plan
            .into_iter()
            .map(Step::new)
            .collect::<std::result::Result<VecDeque<_>, _>>()?;
        let current = steps
            .pop_front()
            .ok_or_else(|| LdError::InvalidConfig("empty command batch".to_string()))?;

        debug!("Executing {} ({} steps)", label, steps.len() + 1);
        let frame = current.frame.clone();
        self.active = Some(Transaction {
            label,
            current,
            steps,
            deadline: now + self.policy.timeout,
            retransmits: 0,
            opened_config: false,
            replies: Vec::new(),
            failure: None,
        });
        Ok(frame)
    }

    /// Feed an acknowledgment received from the radar.
    ///
    /// After a step was retransmitted, the radar may acknowledge both copies.
    /// The surplus acknowledgments are dropped for one timeout period so they
    /// cannot resolve a following step with the same command word.
    pub fn on_ack(&mut self, ack: &Ack, now: Instant) -> Progress {
        if self.discard_stale(ack, now) {
            debug!("Dropping duplicate {} acknowledgment", ack.command);
            return if self.active.is_some() {
                Progress::Waiting
            } else {
                Progress::Idle
            };
        }
        let Some(tx) = self.active.as_mut() else {
            debug!("Ignoring {} acknowledgment, no command pending", ack.command);
            return Progress::Idle;
        };
        let command = tx.current.command;
        if ack.command != command.word() {
            debug!("Ignoring {} acknowledgment while waiting for {}", ack.command, command.word());
            return Progress::Waiting;
        }
        if tx.retransmits > 0 {
            self.stale = Some(StaleAcks {
                command: ack.command,
                remaining: tx.retransmits,
                until: now + self.policy.timeout,
            });
        }

        match command {
            Command::EnterConfig if ack.is_success() => {
                self.config_open = true;
                tx.opened_config = true;
            }
            Command::ExitConfig => self.config_open = false,
            _ => {}
        }

        if !ack.is_success() {
            warn!("{} rejected with status {:#06x}", command, ack.status);
            let error = LdError::Nack {
                command: command.word(),
                status: ack.status,
            };
            return self.fail(error, now);
        }

        if let Some(failure) = tx.failure.take() {
            return self.finish(Err(failure));
        }

        if !command.is_bracket() {
            match Reply::parse(&command, ack) {
                Ok(reply) => tx.replies.push(reply),
                Err(error) => return self.fail(error, now),
            }
        }
        self.advance(now)
    }

    /// Expire the current step's deadline if it has passed.
    pub fn poll(&mut self, now: Instant) -> Progress {
        let Some(tx) = self.active.as_mut() else {
            return Progress::Idle;
        };
        if now < tx.deadline {
            return Progress::Waiting;
        }

        if tx.retransmits < self.policy.retries {
            tx.retransmits += 1;
            tx.deadline = now + self.policy.timeout;
            warn!(
                "No acknowledgment for {}, retransmitting ({}/{})",
                tx.current.command, tx.retransmits, self.policy.retries
            );
            return Progress::Send(tx.current.frame.clone());
        }

        let command = tx.current.command;
        warn!("No acknowledgment for {}, giving up", command);
        if command == Command::ExitConfig {
            self.config_open = false;
        }
        self.fail(LdError::Timeout { command: command.word() }, now)
    }

    /// Drop the in-flight transaction, resolving it with `error`.
    pub fn abort(&mut self, error: LdError) -> Option<Outcome> {
        self.config_open = false;
        self.stale = None;
        let tx = self.active.take()?;
        warn!("{} aborted: {}", tx.label, error);
        Some(Outcome {
            command: tx.label,
            result: Err(error),
        })
    }

    fn discard_stale(&mut self, ack: &Ack, now: Instant) -> bool {
        let Some(stale) = self.stale.as_mut() else {
            return false;
        };
        if now >= stale.until {
            self.stale = None;
            return false;
        }
        if stale.command != ack.command {
            return false;
        }
        stale.remaining -= 1;
        if stale.remaining == 0 {
            self.stale = None;
        }
        true
    }

    fn advance(&mut self, now: Instant) -> Progress {
        let Some(tx) = self.active.as_mut() else {
            return Progress::Idle;
        };
        match tx.steps.pop_front() {
            Some(step) => {
                let frame = step.frame.clone();
                tx.current = step;
                tx.retransmits = 0;
                tx.deadline = now + self.policy.timeout;
                Progress::Send(frame)
            }
            None => {
                let replies = std::mem::take(&mut tx.replies);
                self.finish(Ok(replies))
            }
        }
    }

    /// Resolve with `error`, closing configuration mode first if this
    /// transaction opened it.
    fn fail(&mut self, error: LdError, now: Instant) -> Progress {
        let Some(tx) = self.active.as_mut() else {
            return Progress::Idle;
        };

        let closing = tx.failure.is_some() || tx.current.command == Command::ExitConfig;
        if !closing && tx.opened_config && self.config_open {
            match Step::new(Command::ExitConfig) {
                Ok(exit) => {
                    debug!("Closing configuration mode after failed {}", tx.current.command);
                    let frame = exit.frame.clone();
                    tx.failure = Some(error);
                    tx.steps.clear();
                    tx.current = exit;
                    tx.retransmits = 0;
                    tx.deadline = now + self.policy.timeout;
                    return Progress::Send(frame);
                }
                Err(encoding) => warn!("Cannot encode exit configuration: {}", encoding),
            }
        }

        let error = tx.failure.take().unwrap_or(error);
        self.finish(Err(error))
    }

    fn finish(&mut self, result: Result<Vec<Reply>>) -> Progress {
        let Some(tx) = self.active.take() else {
            return Progress::Idle;
        };
        match &result {
            Ok(_) => debug!("{} completed", tx.label),
            Err(error) => warn!("{} failed: {}", tx.label, error),
        }
        Progress::Done(Outcome {
            command: tx.label,
            result,
        })
    }
}
