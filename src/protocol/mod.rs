//! Control-channel protocol types
//!
//! What the agent sends ([`Action`], [`Event`]), what it gets back
//! ([`Command`]) and how request bodies are produced ([`render`]).

pub mod action;
pub mod command;
pub mod render;

pub use action::{Action, ActionResult, Event, EventType};
pub use command::{Command, CommandData, CommandId};
pub use render::{BasicRequest, JsonResult, Renderer, MAX_RENDER_SIZE};
