//! Online status
//!
//! One process-wide value summarising how the last meaningful loop iteration
//! went. The loop is the only writer; anything may read it at any time.

use crate::transport::Error;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Externally visible connectivity health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum OnlineStatus {
    /// Nothing has happened yet
    Unknown = 0,
    /// Disabled by configuration
    Off,
    /// Host or token missing
    NoConfig,
    NoDns,
    NoConnection,
    Tls,
    /// Token rejected
    Auth,
    ServerError,
    InternalError,
    NetworkError,
    /// The server said something we did not understand
    Confused,
    Ok,
}

impl OnlineStatus {
    const ALL: [OnlineStatus; 12] = [
        OnlineStatus::Unknown,
        OnlineStatus::Off,
        OnlineStatus::NoConfig,
        OnlineStatus::NoDns,
        OnlineStatus::NoConnection,
        OnlineStatus::Tls,
        OnlineStatus::Auth,
        OnlineStatus::ServerError,
        OnlineStatus::InternalError,
        OnlineStatus::NetworkError,
        OnlineStatus::Confused,
        OnlineStatus::Ok,
    ];

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .unwrap_or(OnlineStatus::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OnlineStatus::Unknown => "unknown",
            OnlineStatus::Off => "off",
            OnlineStatus::NoConfig => "no_config",
            OnlineStatus::NoDns => "no_dns",
            OnlineStatus::NoConnection => "no_connection",
            OnlineStatus::Tls => "tls",
            OnlineStatus::Auth => "auth",
            OnlineStatus::ServerError => "server_error",
            OnlineStatus::InternalError => "internal_error",
            OnlineStatus::NetworkError => "network_error",
            OnlineStatus::Confused => "confused",
            OnlineStatus::Ok => "ok",
        }
    }
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static LAST_STATUS: AtomicU8 = AtomicU8::new(OnlineStatus::Unknown as u8);

/// The most recently published status
pub fn last_status() -> OnlineStatus {
    OnlineStatus::from_u8(LAST_STATUS.load(Ordering::Acquire))
}

/// Publish `status`, returning the one it replaced
pub fn publish_status(status: OnlineStatus) -> OnlineStatus {
    OnlineStatus::from_u8(LAST_STATUS.swap(status as u8, Ordering::AcqRel))
}

/// Status reported for a transport error
pub fn err_to_status(error: Error) -> OnlineStatus {
    match error {
        Error::Connect => OnlineStatus::NoConnection,
        Error::Dns => OnlineStatus::NoDns,
        Error::InternalError | Error::ResponseTooLong | Error::SetSockOpt => {
            OnlineStatus::InternalError
        }
        Error::Network | Error::Timeout => OnlineStatus::NetworkError,
        Error::Parse => OnlineStatus::Confused,
        Error::Tls => OnlineStatus::Tls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_round_trip_covers_every_variant() {
        for (index, status) in OnlineStatus::ALL.iter().enumerate() {
            assert_eq!(*status as u8 as usize, index);
            assert_eq!(OnlineStatus::from_u8(*status as u8), *status);
        }
        assert_eq!(OnlineStatus::from_u8(200), OnlineStatus::Unknown);
    }

    #[test]
    fn test_err_to_status() {
        let cases = [
            (Error::Connect, OnlineStatus::NoConnection),
            (Error::Dns, OnlineStatus::NoDns),
            (Error::InternalError, OnlineStatus::InternalError),
            (Error::ResponseTooLong, OnlineStatus::InternalError),
            (Error::SetSockOpt, OnlineStatus::InternalError),
            (Error::Network, OnlineStatus::NetworkError),
            (Error::Timeout, OnlineStatus::NetworkError),
            (Error::Parse, OnlineStatus::Confused),
            (Error::Tls, OnlineStatus::Tls),
        ];
        for (error, expected) in cases {
            assert_eq!(err_to_status(error), expected, "{error:?}");
        }
    }

    #[test]
    fn test_serialization() {
        assert_eq!(
            serde_json::to_string(&OnlineStatus::NoDns).unwrap(),
            "\"NO_DNS\""
        );
        assert_eq!(OnlineStatus::ServerError.to_string(), "server_error");
    }
}
