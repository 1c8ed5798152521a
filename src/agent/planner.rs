//! Action planner
//!
//! Decides what the loop does next and folds the outcome of every exchange
//! back into its schedule. There is one event slot: an event (usually the reply
//! to a command) stays there until the server has taken it or refused it.
//! Telemetry is sent on a fixed interval whenever no event is waiting.
//!
//! Failed exchanges start a cooldown that doubles with each consecutive
//! failure, up to a configured maximum.

use crate::config::TimingSection;
use crate::device::{CommandOutcome, Device};
use crate::protocol::{Action, ActionResult, Command, CommandData, Event, EventType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Scheduling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub telemetry_interval: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::from(&TimingSection::default())
    }
}

impl From<&TimingSection> for PlannerConfig {
    fn from(timing: &TimingSection) -> Self {
        Self {
            telemetry_interval: timing.telemetry_interval(),
            retry_base: timing.retry_base(),
            retry_max: timing.retry_max(),
        }
    }
}

impl PlannerConfig {
    /// Cooldown after `failures` consecutive failed exchanges
    ///
    /// Pattern: base, 2x base, 4x base, ... capped at `retry_max`.
    pub fn calculate_backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.retry_base
            .saturating_mul(1u32 << exponent)
            .min(self.retry_max)
    }
}

/// What the last non-sleep action was
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Event,
    Telemetry,
}

pub struct Planner {
    device: Arc<dyn Device>,
    config: PlannerConfig,
    planned_event: Option<Event>,
    last_telemetry: Option<Instant>,
    failures: u32,
    cooldown_until: Option<Instant>,
    in_flight: Option<InFlight>,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("config", &self.config)
            .field("planned_event", &self.planned_event)
            .field("failures", &self.failures)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl Planner {
    pub fn new(device: Arc<dyn Device>, config: PlannerConfig) -> Self {
        Self {
            device,
            config,
            planned_event: Some(Event::info(None)),
            last_telemetry: None,
            failures: 0,
            cooldown_until: None,
            in_flight: None,
        }
    }

    /// Event waiting to be sent, if any
    pub fn pending_event(&self) -> Option<&Event> {
        self.planned_event.as_ref()
    }

    /// Consecutive failed exchanges
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn next_action(&mut self) -> Action {
        self.next_action_at(Instant::now())
    }

    /// Next action as seen at `now`
    pub fn next_action_at(&mut self, now: Instant) -> Action {
        self.in_flight = None;

        if let Some(until) = self.cooldown_until {
            if until > now {
                return Action::Sleep(until - now);
            }
            self.cooldown_until = None;
        }

        if let Some(event) = &self.planned_event {
            self.in_flight = Some(InFlight::Event);
            return Action::Event(event.clone());
        }

        match self.last_telemetry {
            Some(sent) if now.saturating_duration_since(sent) < self.config.telemetry_interval => {
                Action::Sleep(self.config.telemetry_interval - now.saturating_duration_since(sent))
            }
            _ => {
                self.in_flight = Some(InFlight::Telemetry);
                Action::SendTelemetry
            }
        }
    }

    pub fn action_done(&mut self, result: ActionResult) {
        self.action_done_at(result, Instant::now());
    }

    /// Record how the last action went
    pub fn action_done_at(&mut self, result: ActionResult, now: Instant) {
        let Some(done) = self.in_flight.take() else {
            warn!("Action result {:?} reported with no action outstanding", result);
            return;
        };

        match result {
            ActionResult::Ok | ActionResult::Refused => {
                if result == ActionResult::Refused {
                    info!("Server refused {:?}, dropping it", done);
                }
                self.failures = 0;
                self.cooldown_until = None;
                match done {
                    InFlight::Event => self.planned_event = None,
                    InFlight::Telemetry => self.last_telemetry = Some(now),
                }
            }
            ActionResult::Failed => {
                self.failures = self.failures.saturating_add(1);
                let delay = self.config.calculate_backoff_delay(self.failures);
                debug!(
                    "{:?} failed ({} in a row), retrying in {:?}",
                    done, self.failures, delay
                );
                self.cooldown_until = Some(now + delay);
            }
        }
    }

    /// Handle a command received from the server
    ///
    /// The reply goes into the event slot. If the slot is taken the command
    /// is dropped without running it; the server sends it again.
    pub fn command(&mut self, command: Command) {
        if let Some(pending) = &self.planned_event {
            warn!(
                "Dropping command {} while {:?} is still waiting to be sent",
                command.id, pending.event_type
            );
            return;
        }

        let id = Some(command.id);
        let reply = match &command.data {
            CommandData::Unknown => Event::new(EventType::Unknown, id),
            CommandData::Broken { reason } => {
                Event::new(EventType::Rejected, id).with_reason(reason.as_str())
            }
            CommandData::SendInfo => Event::info(id),
            device_command => {
                debug_assert!(device_command.is_device_command());
                match self.device.execute(device_command) {
                    CommandOutcome::Accepted => Event::new(EventType::Accepted, id),
                    CommandOutcome::Finished => Event::new(EventType::Finished, id),
                    CommandOutcome::Rejected(reason) => {
                        Event::new(EventType::Rejected, id).with_reason(reason)
                    }
                    CommandOutcome::Failed(reason) => {
                        Event::new(EventType::Failed, id).with_reason(reason)
                    }
                }
            }
        };

        debug!("Command {} answered with {:?}", command.id, reply.event_type);
        self.planned_event = Some(reply);
    }

    /// Forget everything; the next action announces the device again
    pub fn reset(&mut self) {
        self.planned_event = Some(Event::info(None));
        self.last_telemetry = None;
        self.failures = 0;
        self.cooldown_until = None;
        self.in_flight = None;
    }
}
