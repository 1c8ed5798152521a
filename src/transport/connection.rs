//! Socket-level connections to the server
//!
//! This module contains the transport error taxonomy and the two connection
//! variants: plain TCP and TLS over TCP. Both apply the same read/write
//! timeout to every operation so a stuck peer surfaces as [`Error::Timeout`].

use super::Connection;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Default read/write timeout applied to every socket operation
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(5000);

/// Transport errors
///
/// Each failure mode is a distinct value. They are cheap to copy so the
/// connection cache can hold one as a pending, report-once error.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("Failed to connect to the server")]
    Connect,
    #[error("Failed to resolve the server host name")]
    Dns,
    #[error("Network error")]
    Network,
    #[error("Timed out waiting for the server")]
    Timeout,
    #[error("Malformed response from the server")]
    Parse,
    #[error("TLS failure")]
    Tls,
    #[error("Failed to set socket option")]
    SetSockOpt,
    #[error("Response is longer than the receive buffer")]
    ResponseTooLong,
    #[error("Internal error")]
    InternalError,
}

impl Error {
    /// Classify an I/O error coming out of a socket or TLS stream
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
            io::ErrorKind::InvalidData
                if error
                    .get_ref()
                    .is_some_and(|inner| inner.is::<rustls::Error>()) =>
            {
                Error::Tls
            }
            _ => Error::Network,
        }
    }
}

static TLS_CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::new();

/// Process-wide TLS client configuration, built on first use
fn tls_config() -> Result<Arc<ClientConfig>, Error> {
    TLS_CONFIG
        .get_or_try_init(|| {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            let config = ClientConfig::builder_with_provider(Arc::new(
                rustls::crypto::ring::default_provider(),
            ))
            .with_safe_default_protocol_versions()
            .map_err(|e| {
                warn!("Unable to build TLS client configuration: {}", e);
                Error::Tls
            })?
            .with_root_certificates(roots)
            .with_no_client_auth();
            Ok(Arc::new(config))
        })
        .cloned()
}

/// Resolve `host` and open a TCP stream to the first address that answers
async fn open_tcp(host: &str, port: u16, io_timeout: Duration) -> Result<TcpStream, Error> {
    let addrs = match timeout(io_timeout, tokio::net::lookup_host((host, port))).await {
        Ok(Ok(addrs)) => addrs.collect::<Vec<_>>(),
        Ok(Err(e)) => {
            debug!("DNS lookup for {} failed: {}", host, e);
            return Err(Error::Dns);
        }
        Err(_) => {
            debug!("DNS lookup for {} timed out", host);
            return Err(Error::Dns);
        }
    };

    if addrs.is_empty() {
        return Err(Error::Dns);
    }

    for addr in addrs {
        match timeout(io_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).map_err(|_| Error::SetSockOpt)?;
                debug!("Connected to {} ({})", host, addr);
                return Ok(stream);
            }
            Ok(Err(e)) => debug!("Connection to {} failed: {}", addr, e),
            Err(_) => debug!("Connection to {} timed out", addr),
        }
    }

    Err(Error::Connect)
}

/// Plain TCP connection
#[derive(Debug)]
pub struct PlainConnection {
    stream: Option<TcpStream>,
    io_timeout: Duration,
}

impl PlainConnection {
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            stream: None,
            io_timeout,
        }
    }
}

impl Default for PlainConnection {
    fn default() -> Self {
        Self::new(DEFAULT_IO_TIMEOUT)
    }
}

#[async_trait]
impl Connection for PlainConnection {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        self.stream = Some(open_tcp(host, port, self.io_timeout).await?);
        Ok(())
    }

    async fn tx(&mut self, data: &[u8]) -> Result<usize, Error> {
        let stream = self.stream.as_mut().ok_or(Error::Network)?;
        match timeout(self.io_timeout, stream.write(data)).await {
            Ok(result) => result.map_err(|e| Error::from_io(&e)),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn rx(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let stream = self.stream.as_mut().ok_or(Error::Network)?;
        match timeout(self.io_timeout, stream.read(buffer)).await {
            Ok(result) => result.map_err(|e| Error::from_io(&e)),
            Err(_) => Err(Error::Timeout),
        }
    }
}

/// TLS connection over TCP, verified against the bundled web PKI roots
pub struct TlsConnection {
    stream: Option<TlsStream<TcpStream>>,
    io_timeout: Duration,
}

impl TlsConnection {
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            stream: None,
            io_timeout,
        }
    }
}

impl Default for TlsConnection {
    fn default() -> Self {
        Self::new(DEFAULT_IO_TIMEOUT)
    }
}

impl std::fmt::Debug for TlsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnection")
            .field("connected", &self.stream.is_some())
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

#[async_trait]
impl Connection for TlsConnection {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        let server_name = ServerName::try_from(host.to_owned()).map_err(|_| {
            warn!("Host {} is not a valid TLS server name", host);
            Error::Tls
        })?;
        let connector = TlsConnector::from(tls_config()?);
        let tcp = open_tcp(host, port, self.io_timeout).await?;

        match timeout(self.io_timeout, connector.connect(server_name, tcp)).await {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("TLS handshake with {} failed: {}", host, e);
                Err(Error::Tls)
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn tx(&mut self, data: &[u8]) -> Result<usize, Error> {
        let stream = self.stream.as_mut().ok_or(Error::Network)?;
        let written = match timeout(self.io_timeout, stream.write(data)).await {
            Ok(result) => result.map_err(|e| Error::from_io(&e))?,
            Err(_) => return Err(Error::Timeout),
        };
        // rustls buffers plaintext; push the records out before we wait for the answer.
        match timeout(self.io_timeout, stream.flush()).await {
            Ok(result) => result.map_err(|e| Error::from_io(&e))?,
            Err(_) => return Err(Error::Timeout),
        }
        Ok(written)
    }

    async fn rx(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let stream = self.stream.as_mut().ok_or(Error::Network)?;
        match timeout(self.io_timeout, stream.read(buffer)).await {
            Ok(result) => result.map_err(|e| Error::from_io(&e)),
            Err(_) => Err(Error::Timeout),
        }
    }
}
