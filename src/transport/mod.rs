//! Transport layer for the control channel
//!
//! This module provides the connection abstraction, the single-slot connection
//! cache and the minimal HTTP/1.1 client that runs one exchange at a time over it.

pub mod cache;
pub mod client;
pub mod connection;
pub mod http;

pub use cache::{CachedConnection, ConnectionCache};
pub use client::{BodyReader, HttpClient, Response};
pub use connection::{Error, PlainConnection, TlsConnection};
pub use http::{BodyChunk, ContentType, HeaderOut, Method, Request, Status};

/// A byte stream to the server
///
/// Implemented by the plain TCP and the TLS variant; tests provide in-memory
/// implementations. All operations report failures through the transport
/// [`Error`] taxonomy, never by panicking.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Establish the connection to `host:port`
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), Error>;

    /// Send bytes, returning how many were accepted (may be fewer than offered)
    async fn tx(&mut self, data: &[u8]) -> Result<usize, Error>;

    /// Receive bytes into `buffer`, returning how many were read
    ///
    /// Zero means the peer closed the stream.
    async fn rx(&mut self, buffer: &mut [u8]) -> Result<usize, Error>;
}

/// Source of the connection an exchange runs over
///
/// The HTTP client asks for the connection once per exchange and uses
/// [`host`](ConnectionFactory::host) for the `Host` header.
pub trait ConnectionFactory: Send {
    /// The currently usable connection, or the error that prevented one
    fn connection(&mut self) -> Result<&mut dyn Connection, Error>;

    /// Host name the connection points to
    fn host(&self) -> &str;

    /// Drop the current connection; the next use reconnects
    fn invalidate(&mut self);
}
