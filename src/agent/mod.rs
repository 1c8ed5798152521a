//! The control-channel agent
//!
//! The [`Planner`] decides what to send, [`Connect`] runs the loop that sends
//! it, and [`status`] publishes how it went.

pub mod connect;
pub mod planner;
pub mod status;

pub use connect::{Connect, IDLE_WAIT, MAX_RESP_SIZE};
pub use planner::{Planner, PlannerConfig};
pub use status::{err_to_status, last_status, publish_status, OnlineStatus};
