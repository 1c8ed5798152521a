//! Units of work the planner hands to the loop

use super::command::CommandId;
use serde::Serialize;
use std::time::Duration;

/// What the loop does next
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Nothing is due; wait this long
    Sleep(Duration),
    /// Post current telemetry
    SendTelemetry,
    /// Post an event
    Event(Event),
}

/// Kind of event reported to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Device description, sent on start and on request
    Info,
    /// A command was taken over and is running
    Accepted,
    /// A command could not be carried out
    Rejected,
    /// A command was not understood
    Unknown,
    /// A command completed
    Finished,
    /// A command was started but failed
    Failed,
}

/// An event, usually the reply to a command
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    pub command_id: Option<CommandId>,
    pub reason: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType, command_id: Option<CommandId>) -> Self {
        Self {
            event_type,
            command_id,
            reason: None,
        }
    }

    pub fn info(command_id: Option<CommandId>) -> Self {
        Self::new(EventType::Info, command_id)
    }

    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// How an exchange went, from the planner's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionResult {
    /// Delivered
    Ok,
    /// Not delivered, try again later
    Failed,
    /// The server will not take it; drop it
    Refused,
}
