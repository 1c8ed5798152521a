//! The device side of the control channel
//!
//! The agent does not know how the device works. It reads a description of
//! the device once, samples telemetry whenever it reports, and hands commands
//! over through the [`Device`] trait.

use crate::protocol::CommandData;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

/// Length of the raw fingerprint sent with every request
pub const FINGERPRINT_SIZE: usize = 16;

/// Fixed-size device fingerprint
///
/// Stored as raw bytes; it is not terminated and goes on the wire with an
/// explicit length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    pub const fn new(raw: [u8; FINGERPRINT_SIZE]) -> Self {
        Self(raw)
    }

    /// Take the first [`FINGERPRINT_SIZE`] characters of `value`
    ///
    /// Returns `None` when `value` is shorter or holds anything but
    /// printable ASCII.
    pub fn parse(value: &str) -> Option<Self> {
        let bytes = value.as_bytes();
        if bytes.len() < FINGERPRINT_SIZE || !bytes.iter().all(u8::is_ascii_graphic) {
            return None;
        }
        let mut raw = [0u8; FINGERPRINT_SIZE];
        raw.copy_from_slice(&bytes[..FINGERPRINT_SIZE]);
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    /// Text form; empty if the raw bytes are not UTF-8
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

/// Static description of the device
#[derive(Debug, Clone, PartialEq)]
pub struct PrinterInfo {
    pub printer_type: String,
    pub firmware: String,
    pub serial: Option<String>,
    pub fingerprint: Fingerprint,
}

/// Coarse device state reported with telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrinterState {
    #[default]
    Idle,
    Busy,
    Printing,
    Paused,
    Finished,
    Stopped,
    Error,
}

/// One telemetry sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub state: PrinterState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_nozzle: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_bed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_nozzle: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_bed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_path: Option<String>,
}

/// Result of handing a command to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Started, completion is not tracked
    Accepted,
    Finished,
    Rejected(String),
    Failed(String),
}

/// Interface to the device the agent runs on
pub trait Device: Send + Sync {
    fn printer_info(&self) -> PrinterInfo;

    fn telemetry(&self) -> Telemetry;

    /// Carry out a device command
    ///
    /// Only called with commands for which
    /// [`CommandData::is_device_command`] holds.
    fn execute(&self, command: &CommandData) -> CommandOutcome;
}

#[derive(Debug)]
struct SimState {
    state: PrinterState,
    job_path: Option<String>,
    progress: u8,
}

/// Stand-in device for running the agent without hardware
///
/// Tracks a print job state machine and reports plausible temperatures.
/// G-code is logged and reported finished.
#[derive(Debug)]
pub struct SimulatedDevice {
    info: PrinterInfo,
    state: Mutex<SimState>,
}

impl SimulatedDevice {
    pub fn new(info: PrinterInfo) -> Self {
        Self {
            info,
            state: Mutex::new(SimState {
                state: PrinterState::Idle,
                job_path: None,
                progress: 0,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl Device for SimulatedDevice {
    fn printer_info(&self) -> PrinterInfo {
        self.info.clone()
    }

    fn telemetry(&self) -> Telemetry {
        self.with_state(|sim| {
            let printing = matches!(sim.state, PrinterState::Printing | PrinterState::Paused);
            if sim.state == PrinterState::Printing {
                sim.progress = sim.progress.saturating_add(1).min(100);
                if sim.progress == 100 {
                    sim.state = PrinterState::Finished;
                }
            }
            Telemetry {
                state: sim.state,
                temp_nozzle: Some(if printing { 214.8 } else { 24.5 }),
                temp_bed: Some(if printing { 59.9 } else { 23.1 }),
                target_nozzle: Some(if printing { 215.0 } else { 0.0 }),
                target_bed: Some(if printing { 60.0 } else { 0.0 }),
                progress: sim.job_path.as_ref().map(|_| sim.progress),
                job_path: sim.job_path.clone(),
            }
        })
    }

    fn execute(&self, command: &CommandData) -> CommandOutcome {
        self.with_state(|sim| match command {
            CommandData::Gcode(gcode) => {
                for line in gcode.lines().filter(|l| !l.trim().is_empty()) {
                    info!("Simulated device executing G-code: {}", line.trim());
                }
                CommandOutcome::Finished
            }
            CommandData::StartPrint { path } => match sim.state {
                PrinterState::Idle | PrinterState::Finished | PrinterState::Stopped => {
                    info!("Simulated device starting print of {}", path);
                    sim.state = PrinterState::Printing;
                    sim.job_path = Some(path.clone());
                    sim.progress = 0;
                    CommandOutcome::Accepted
                }
                _ => CommandOutcome::Rejected("Printer is busy".to_string()),
            },
            CommandData::PausePrint => match sim.state {
                PrinterState::Printing => {
                    sim.state = PrinterState::Paused;
                    CommandOutcome::Finished
                }
                _ => CommandOutcome::Rejected("No print is running".to_string()),
            },
            CommandData::ResumePrint => match sim.state {
                PrinterState::Paused => {
                    sim.state = PrinterState::Printing;
                    CommandOutcome::Finished
                }
                _ => CommandOutcome::Rejected("Print is not paused".to_string()),
            },
            CommandData::StopPrint => match sim.state {
                PrinterState::Printing | PrinterState::Paused => {
                    sim.state = PrinterState::Stopped;
                    CommandOutcome::Finished
                }
                _ => CommandOutcome::Rejected("No print is running".to_string()),
            },
            CommandData::SendInfo | CommandData::Unknown | CommandData::Broken { .. } => {
                CommandOutcome::Rejected("Not a device command".to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> PrinterInfo {
        PrinterInfo {
            printer_type: "MK4".to_string(),
            firmware: "6.0.0".to_string(),
            serial: None,
            fingerprint: Fingerprint::parse("0123456789abcdef").unwrap(),
        }
    }

    #[test]
    fn test_fingerprint_parse() {
        let fp = Fingerprint::parse("0123456789abcdefEXTRA").unwrap();
        assert_eq!(fp.as_bytes(), b"0123456789abcdef");
        assert_eq!(fp.as_str(), "0123456789abcdef");

        assert!(Fingerprint::parse("too-short").is_none());
        assert!(Fingerprint::parse("0123456789 abcdef").is_none());
        assert!(Fingerprint::parse("0123456789abcdeé").is_none());
    }

    #[test]
    fn test_telemetry_serialization_skips_missing_fields() {
        let json = serde_json::to_value(Telemetry::default()).unwrap();
        assert_eq!(json, serde_json::json!({"state": "IDLE"}));
    }

    #[test]
    fn test_simulated_print_lifecycle() {
        let device = SimulatedDevice::new(info());

        assert!(matches!(
            device.execute(&CommandData::PausePrint),
            CommandOutcome::Rejected(_)
        ));

        let start = CommandData::StartPrint {
            path: "/usb/box.gcode".to_string(),
        };
        assert_eq!(device.execute(&start), CommandOutcome::Accepted);
        assert_eq!(device.telemetry().state, PrinterState::Printing);
        assert!(matches!(device.execute(&start), CommandOutcome::Rejected(_)));

        assert_eq!(
            device.execute(&CommandData::PausePrint),
            CommandOutcome::Finished
        );
        assert_eq!(
            device.execute(&CommandData::ResumePrint),
            CommandOutcome::Finished
        );
        assert_eq!(
            device.execute(&CommandData::StopPrint),
            CommandOutcome::Finished
        );

        let telemetry = device.telemetry();
        assert_eq!(telemetry.state, PrinterState::Stopped);
        assert_eq!(telemetry.job_path.as_deref(), Some("/usb/box.gcode"));
    }

    #[test]
    fn test_simulated_gcode_finishes() {
        let device = SimulatedDevice::new(info());
        assert_eq!(
            device.execute(&CommandData::Gcode("G28\n\nM105".to_string())),
            CommandOutcome::Finished
        );
    }
}
