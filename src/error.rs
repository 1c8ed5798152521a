//! Top-level error type and log redaction
//!
//! Errors inside one exchange never leave the loop; they become an action
//! result and an online status. [`AgentError`] covers what can stop the
//! process before the loop runs: unreadable configuration and I/O at startup.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATED_SUFFIX: &str = "...[truncated]";

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)(\s*[=:]\s*)\S+").ok());

static SECRET_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.config)/[a-zA-Z0-9._/-]+").ok()
});

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AgentError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Display form safe for logs
    pub fn redacted(&self) -> String {
        redact_secrets(&self.to_string())
    }
}

/// Remove anything that looks like a credential from `message`
///
/// Also hides paths into secret directories and truncates long messages.
pub fn redact_secrets(message: &str) -> String {
    let mut redacted = message.to_string();

    if let Some(pattern) = SECRET_PATTERN.as_ref() {
        redacted = pattern.replace_all(&redacted, "${1}${2}***").into_owned();
    }
    if let Some(pattern) = SECRET_PATH_PATTERN.as_ref() {
        redacted = pattern
            .replace_all(&redacted, "/***REDACTED***/")
            .into_owned();
    }

    if redacted.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATED_SUFFIX.len();
        while !redacted.is_char_boundary(cut) {
            cut -= 1;
        }
        redacted.truncate(cut);
        redacted.push_str(TRUNCATED_SUFFIX);
    }

    redacted
}

pub type AgentResult<T> = Result<T, AgentError>;
