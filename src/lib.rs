//! connect-agent
//!
//! Device-side control channel to a remote print farm server. A single loop
//! plans what to send next (telemetry, an event, or nothing), posts it over a
//! cached HTTP/1.1 connection with a chunked body, reads back any command the
//! server attached, and publishes an online status summarising how it went.
//!
//! # Quick Start
//!
//! ```no_run
//! use connect_agent::agent::Connect;
//! use connect_agent::config::{AgentConfig, FileConfigSource};
//! use connect_agent::device::SimulatedDevice;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::load_from_file("connect.toml".as_ref())?;
//! let device = Arc::new(SimulatedDevice::new(config.printer.to_printer_info()?));
//! let mut connect = Connect::new(FileConfigSource::new("connect.toml"), device, &config.timing);
//!
//! // One iteration; `run` loops forever
//! if let Some(status) = connect.step().await {
//!     println!("online status: {status}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod device;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use agent::{last_status, Connect, OnlineStatus};
pub use config::{AgentConfig, ConfigError, ConfigSource, Configuration};
pub use error::{AgentError, AgentResult};
