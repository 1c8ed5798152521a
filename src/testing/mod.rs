//! Testing utilities and mock implementations
//!
//! Lets the transport, planner and loop be exercised without a real server
//! or device.

pub mod mocks;

pub use mocks::*;
