//! Single-slot connection cache
//!
//! Holds at most one live connection between loop iterations, or the error the
//! last establishment attempt produced. A cached error is reported exactly once;
//! after that the slot is empty and the next [`ConnectionCache::refresh`]
//! connects again.

use super::connection::{Error, PlainConnection, TlsConnection};
use super::{Connection, ConnectionFactory};
use std::future::Future;
use tracing::{debug, warn};

/// Contents of the cache slot
#[derive(Debug, Default)]
pub enum CachedConnection {
    #[default]
    Empty,
    Tls(TlsConnection),
    Plain(PlainConnection),
    /// Establishment failed; reported once, then the slot empties
    Failed(Error),
}

impl CachedConnection {
    pub fn is_empty(&self) -> bool {
        matches!(self, CachedConnection::Empty)
    }

    pub fn is_live(&self) -> bool {
        matches!(self, CachedConnection::Tls(_) | CachedConnection::Plain(_))
    }
}

/// Connection cache keyed implicitly by the configuration fingerprint
#[derive(Debug, Default)]
pub struct ConnectionCache {
    slot: CachedConnection,
    host: String,
    fingerprint: u32,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self) -> &CachedConnection {
        &self.slot
    }

    /// Fingerprint of the configuration the cached connection was made for
    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    /// Remember `fingerprint`, dropping the connection if it differs
    ///
    /// Returns `true` when the cache was invalidated.
    pub fn check_fingerprint(&mut self, fingerprint: u32) -> bool {
        if fingerprint == self.fingerprint {
            return false;
        }
        debug!(
            "Configuration fingerprint changed ({:08x} -> {:08x}), dropping connection",
            self.fingerprint, fingerprint
        );
        self.fingerprint = fingerprint;
        self.invalidate();
        true
    }

    /// Make sure the slot is filled before use
    ///
    /// When the slot is empty, `establish` is awaited and its outcome stored;
    /// otherwise it is not called at all. The slot is never empty afterwards.
    pub async fn refresh<F, Fut>(&mut self, host: &str, establish: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedConnection>,
    {
        if self.host != host {
            self.host.clear();
            self.host.push_str(host);
        }

        if !self.slot.is_empty() {
            return;
        }

        self.slot = match establish().await {
            CachedConnection::Empty => {
                warn!("Connection establishment produced nothing");
                CachedConnection::Failed(Error::InternalError)
            }
            established => established,
        };
    }
}

impl ConnectionFactory for ConnectionCache {
    fn connection(&mut self) -> Result<&mut dyn Connection, Error> {
        if let CachedConnection::Failed(error) = self.slot {
            // One-off: the next refresh tries to connect again
            self.slot = CachedConnection::Empty;
            return Err(error);
        }

        match &mut self.slot {
            CachedConnection::Tls(conn) => Ok(conn),
            CachedConnection::Plain(conn) => Ok(conn),
            CachedConnection::Empty | CachedConnection::Failed(_) => {
                warn!("Connection requested from an empty cache");
                Err(Error::InternalError)
            }
        }
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn invalidate(&mut self) {
        if !self.slot.is_empty() {
            debug!("Invalidating cached connection");
            crate::observability::metrics().record_invalidation();
        }
        self.slot = CachedConnection::Empty;
    }
}
