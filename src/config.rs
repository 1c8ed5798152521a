//! Agent configuration
//!
//! The agent is configured from a TOML file with three sections:
//!
//! ```toml
//! [connect]
//! host = "connect.example.com"
//! token_env = "CONNECT_TOKEN"
//! tls = true
//!
//! [printer]
//! fingerprint = "0123456789abcdef"
//! printer_type = "MK4"
//! firmware = "6.0.0"
//!
//! [timing]
//! telemetry_interval_ms = 4000
//! ```
//!
//! `[printer]` and `[timing]` are read once at startup. `[connect]` is read
//! again at the top of every loop iteration through a [`ConfigSource`], so
//! edits to the server settings apply without a restart.

use crate::device::{Fingerprint, PrinterInfo, FINGERPRINT_SIZE};
use crate::error::redact_secrets;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_TLS_PORT: u16 = 443;
const DEFAULT_PLAIN_PORT: u16 = 80;

/// Server settings for one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub host: String,
    pub token: String,
    pub port: u16,
    pub tls: bool,
    pub enabled: bool,
}

impl Default for Configuration {
    /// An enabled but unconfigured snapshot
    fn default() -> Self {
        Self {
            host: String::new(),
            token: String::new(),
            port: DEFAULT_TLS_PORT,
            tls: true,
            enabled: true,
        }
    }
}

impl Configuration {
    /// Host and token are both required to talk to the server
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.token.is_empty()
    }

    /// Order-sensitive checksum over every field
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.host.as_bytes());
        hasher.update(self.token.as_bytes());
        hasher.update(&self.port.to_le_bytes());
        hasher.update(&[u8::from(self.tls), u8::from(self.enabled)]);
        hasher.finalize()
    }
}

/// Supplies the server settings at the top of every iteration
pub trait ConfigSource: Send {
    fn connect_config(&mut self) -> Configuration;
}

/// Full configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub connect: ConnectSection,
    pub printer: PrinterSection,
    #[serde(default)]
    pub timing: TimingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectSection {
    #[serde(default)]
    pub host: String,
    /// Token used directly; takes precedence over `token_env`
    #[serde(default)]
    pub token: String,
    /// Environment variable holding the token
    pub token_env: Option<String>,
    /// Defaults to 443 with TLS, 80 without
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ConnectSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            token: String::new(),
            token_env: None,
            port: None,
            tls: true,
            enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrinterSection {
    /// At least 16 printable ASCII characters; the first 16 are used
    pub fingerprint: String,
    pub printer_type: String,
    pub firmware: String,
    pub serial: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSection {
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_ms: u64,
    #[serde(default = "default_retry_base")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max")]
    pub retry_max_ms: u64,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
}

fn default_telemetry_interval() -> u64 {
    4000
}

fn default_retry_base() -> u64 {
    1000
}

fn default_retry_max() -> u64 {
    64000
}

fn default_io_timeout() -> u64 {
    5000
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            telemetry_interval_ms: default_telemetry_interval(),
            retry_base_ms: default_retry_base(),
            retry_max_ms: default_retry_max(),
            io_timeout_ms: default_io_timeout(),
        }
    }
}

impl TimingSection {
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConnectSection {
    /// Token from the file, else from `token_env`
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if !self.token.is_empty() {
            return Ok(self.token.clone());
        }
        match &self.token_env {
            Some(name) => {
                std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.clone()))
            }
            None => Ok(String::new()),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        })
    }

    /// Snapshot for the loop
    pub fn to_configuration(&self) -> Result<Configuration, ConfigError> {
        let token = self.resolve_token()?;
        // An environment token is only known here
        reject_control_chars("connect.token", &token)?;
        Ok(Configuration {
            host: self.host.trim().to_string(),
            token,
            port: self.port(),
            tls: self.tls,
            enabled: self.enabled,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "connect.port must not be 0".to_string(),
            ));
        }
        if self.host.contains(['/', ' ', ':']) {
            return Err(ConfigError::InvalidConfig(format!(
                "connect.host '{}' must be a bare host name",
                self.host
            )));
        }
        reject_control_chars("connect.host", &self.host)?;
        reject_control_chars("connect.token", &self.token)
    }
}

/// Both values end up in request headers verbatim
fn reject_control_chars(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.chars().any(|c| c.is_ascii_control()) {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

impl PrinterSection {
    pub fn to_printer_info(&self) -> Result<PrinterInfo, ConfigError> {
        let fingerprint = Fingerprint::parse(&self.fingerprint).ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "printer.fingerprint must be at least {FINGERPRINT_SIZE} printable ASCII characters"
            ))
        })?;
        Ok(PrinterInfo {
            printer_type: self.printer_type.clone(),
            firmware: self.firmware.clone(),
            serial: self.serial.clone(),
            fingerprint,
        })
    }
}

impl TimingSection {
    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("telemetry_interval_ms", self.telemetry_interval_ms),
            ("retry_base_ms", self.retry_base_ms),
            ("retry_max_ms", self.retry_max_ms),
            ("io_timeout_ms", self.io_timeout_ms),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidConfig(format!(
                "timing.{name} must be greater than 0"
            )));
        }
        if self.retry_base_ms > self.retry_max_ms {
            return Err(ConfigError::InvalidConfig(
                "timing.retry_base_ms must not exceed timing.retry_max_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl AgentConfig {
    /// Load and validate the configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connect.validate()?;
        self.printer.to_printer_info()?;
        self.timing.validate()
    }

    /// Copy suitable for display, with the token hidden
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.connect.token.is_empty() {
            copy.connect.token = "***".to_string();
        }
        copy
    }

    /// Render as TOML with the token hidden
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(&self.redacted())
            .map_err(|e| ConfigError::InvalidConfig(format!("Unable to render configuration: {e}")))
    }
}

/// Only the part of the file the loop re-reads
#[derive(Debug, Deserialize)]
struct ConnectFile {
    #[serde(default)]
    connect: ConnectSection,
}

/// Re-reads `[connect]` from the configuration file on every call
///
/// A file that cannot be read or parsed yields an unconfigured snapshot. The
/// same problem is only logged once until it changes.
#[derive(Debug)]
pub struct FileConfigSource {
    path: PathBuf,
    last_problem: Option<String>,
}

impl FileConfigSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            last_problem: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Configuration, ConfigError> {
        let content = std::fs::read_to_string(&self.path)?;
        let file: ConnectFile = toml::from_str(&content)?;
        file.connect.validate()?;
        file.connect.to_configuration()
    }
}

impl ConfigSource for FileConfigSource {
    fn connect_config(&mut self) -> Configuration {
        match self.load() {
            Ok(config) => {
                if self.last_problem.take().is_some() {
                    info!("Configuration at {} is usable again", self.path.display());
                }
                config
            }
            Err(e) => {
                let problem = redact_secrets(&e.to_string());
                if self.last_problem.as_deref() != Some(problem.as_str()) {
                    warn!(
                        "Ignoring configuration at {}: {}",
                        self.path.display(),
                        problem
                    );
                    self.last_problem = Some(problem);
                }
                Configuration::default()
            }
        }
    }
}
