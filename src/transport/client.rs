//! Minimal HTTP/1.1 client
//!
//! Runs exactly one request/response exchange over a connection supplied by a
//! [`ConnectionFactory`], using a single fixed buffer that is reused for the
//! request headers, every body chunk and the response head.
//!
//! # Wire format
//!
//! ```text
//! POST /p/telemetry HTTP/1.1\r\n
//! Host: <factory host>\r\n
//! Connection: keep-alive\r\n
//! Transfer-Encoding: chunked\r\n
//! Content-Type: application/json\r\n
//! <extra headers in request order>\r\n
//! \r\n
//! 0011\r\n{"hello":"world"}\r\n
//! 0000\r\n\r\n
//! ```
//!
//! Chunk sizes are always four hex digits, including the terminating zero
//! chunk, which is what the server side expects.

use super::http::{BodyChunk, ContentType, Request, Status};
use super::{Connection, ConnectionFactory, Error};
use crate::protocol::CommandId;
use std::io::Write;
use tracing::{debug, trace, warn};

/// Size of the scratch buffer shared by request and response handling
pub const HTTP_BUFFER_SIZE: usize = 1024;

/// Response header carrying the server's command identifier
pub const COMMAND_ID_HEADER: &str = "Command-Id";

// "XXXX\r\n" before the chunk data and "\r\n" after it
const CHUNK_PREFIX: usize = 6;
const CHUNK_SUFFIX: usize = 2;
const MAX_CHUNK: usize = 0xFFFF;
const TERMINAL_CHUNK: &[u8] = b"0000\r\n\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Write all of `data`, looping over partial writes
async fn send_all(conn: &mut dyn Connection, mut data: &[u8]) -> Result<(), Error> {
    while !data.is_empty() {
        let written = conn.tx(data).await?;
        if written == 0 {
            return Err(Error::Network);
        }
        data = &data[written.min(data.len())..];
    }
    Ok(())
}

/// Buffered writer for the header block
struct Outgoing<'b> {
    conn: &'b mut dyn Connection,
    buffer: &'b mut [u8],
    used: usize,
}

impl Outgoing<'_> {
    async fn write(&mut self, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            if self.used == self.buffer.len() {
                self.flush().await?;
            }
            let n = data.len().min(self.buffer.len() - self.used);
            self.buffer[self.used..self.used + n].copy_from_slice(&data[..n]);
            self.used += n;
            data = &data[n..];
        }
        Ok(())
    }

    async fn header(&mut self, name: &str, value: &[u8]) -> Result<(), Error> {
        if value.iter().any(|b| matches!(b, b'\r' | b'\n')) {
            warn!("Refusing to send header {} with a line break in its value", name);
            return Err(Error::InternalError);
        }
        self.write(name.as_bytes()).await?;
        self.write(b": ").await?;
        self.write(value).await?;
        self.write(b"\r\n").await
    }

    async fn flush(&mut self) -> Result<(), Error> {
        send_all(self.conn, &self.buffer[..self.used]).await?;
        self.used = 0;
        Ok(())
    }
}

/// Parsed status line and headers
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResponseHead {
    pub status: Status,
    pub content_type: ContentType,
    pub content_length: usize,
    pub command_id: Option<CommandId>,
    pub can_keep_alive: bool,
}

/// Position just past the blank line ending the header block
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(HEADER_END.len())
        .position(|window| window == HEADER_END)
        .map(|pos| pos + HEADER_END.len())
}

/// Parse the status line and headers (pure function)
pub(crate) fn parse_head(head: &[u8]) -> Result<ResponseHead, Error> {
    let text = std::str::from_utf8(head).map_err(|_| Error::Parse)?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().ok_or(Error::Parse)?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().ok_or(Error::Parse)?;
    let default_keep_alive = match version {
        "HTTP/1.1" => true,
        "HTTP/1.0" => false,
        _ => return Err(Error::Parse),
    };
    let code = parts.next().ok_or(Error::Parse)?;
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Parse);
    }
    let status = Status::from_code(code.parse().map_err(|_| Error::Parse)?);

    let mut content_type = ContentType::ApplicationOctetStream;
    let mut content_length = 0;
    let mut command_id = None;
    let mut connection = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or(Error::Parse)?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(Error::Parse);
        }

        if name.eq_ignore_ascii_case("Content-Length") {
            content_length = value.parse().map_err(|_| Error::Parse)?;
        } else if name.eq_ignore_ascii_case("Content-Type") {
            content_type = ContentType::parse(value);
        } else if name.eq_ignore_ascii_case(COMMAND_ID_HEADER) {
            command_id = Some(CommandId(value.parse().map_err(|_| Error::Parse)?));
        } else if name.eq_ignore_ascii_case("Connection") {
            let mut tokens = value.split(',').map(str::trim);
            if tokens.clone().any(|t| t.eq_ignore_ascii_case("close")) {
                connection = Some(false);
            } else if tokens.any(|t| t.eq_ignore_ascii_case("keep-alive")) {
                connection = Some(true);
            }
        }
    }

    Ok(ResponseHead {
        status,
        content_type,
        content_length,
        command_id,
        can_keep_alive: connection.unwrap_or(default_keep_alive),
    })
}

/// Streaming reader over a response body
///
/// Bound to the connection for the lifetime of the response. It never hands
/// out more than the declared `Content-Length`; once that is consumed, reads
/// return zero without touching the connection.
pub struct BodyReader<'a> {
    conn: &'a mut dyn Connection,
    pending: &'a [u8],
    remaining: usize,
}

impl<'a> BodyReader<'a> {
    fn new(conn: &'a mut dyn Connection, pending: &'a [u8], content_length: usize) -> Self {
        Self {
            conn,
            pending: &pending[..pending.len().min(content_length)],
            remaining: content_length,
        }
    }

    /// Body bytes not yet read
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Read the next part of the body into `buffer`
    ///
    /// At most `min(buffer.len(), remaining)` bytes are read.
    pub async fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let want = buffer.len().min(self.remaining);
        if want == 0 {
            return Ok(0);
        }

        if !self.pending.is_empty() {
            let n = want.min(self.pending.len());
            buffer[..n].copy_from_slice(&self.pending[..n]);
            self.pending = &self.pending[n..];
            self.remaining -= n;
            return Ok(n);
        }

        let n = self.conn.rx(&mut buffer[..want]).await?;
        if n == 0 {
            return Err(Error::Network);
        }
        let n = n.min(want);
        self.remaining -= n;
        Ok(n)
    }

    /// Read the whole remaining body into `buffer`
    ///
    /// Fails with [`Error::ResponseTooLong`] before reading anything if the
    /// body does not fit.
    pub async fn read_to_end(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        if self.remaining > buffer.len() {
            return Err(Error::ResponseTooLong);
        }
        let mut pos = 0;
        while self.remaining > 0 {
            pos += self.read(&mut buffer[pos..]).await?;
        }
        Ok(pos)
    }
}

/// A parsed response whose body can still be read
pub struct Response<'a> {
    pub status: Status,
    pub content_type: ContentType,
    pub command_id: Option<CommandId>,
    pub can_keep_alive: bool,
    body: BodyReader<'a>,
}

impl Response<'_> {
    /// Remaining (unread) body length
    pub fn content_length(&self) -> usize {
        self.body.remaining()
    }

    pub async fn read_body(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        self.body.read(buffer).await
    }

    pub async fn read_body_to_end(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        self.body.read_to_end(buffer).await
    }
}

impl std::fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length())
            .field("command_id", &self.command_id)
            .field("can_keep_alive", &self.can_keep_alive)
            .finish()
    }
}

/// HTTP client owning the reusable exchange buffer
pub struct HttpClient {
    buffer: Box<[u8]>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; HTTP_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Send `request` and parse the response head
    ///
    /// The returned response borrows both the buffer and the connection, so
    /// the body must be consumed (or the response dropped) before the factory
    /// is touched again.
    pub async fn send<'a>(
        &'a mut self,
        factory: &'a mut dyn ConnectionFactory,
        request: &mut dyn Request,
    ) -> Result<Response<'a>, Error> {
        let buffer: &'a mut [u8] = &mut self.buffer;

        // The request line and Host go in before we borrow the connection.
        let mut used = {
            let mut cursor = &mut buffer[..];
            let capacity = cursor.len();
            write!(
                cursor,
                "{} {} HTTP/1.1\r\nHost: {}\r\n",
                request.method().as_str(),
                request.url(),
                factory.host()
            )
            .map_err(|_| Error::InternalError)?;
            capacity - cursor.len()
        };
        debug!(
            "Sending {} {} to {}",
            request.method().as_str(),
            request.url(),
            factory.host()
        );

        let conn: &'a mut dyn Connection = factory.connection()?;

        {
            let mut out = Outgoing {
                conn: &mut *conn,
                buffer: &mut *buffer,
                used,
            };
            out.write(b"Connection: keep-alive\r\n").await?;
            out.write(b"Transfer-Encoding: chunked\r\n").await?;
            out.header("Content-Type", request.content_type().as_str().as_bytes())
                .await?;
            for header in request.extra_headers() {
                out.header(header.name, header.wire_value()).await?;
            }
            out.write(b"\r\n").await?;
            out.flush().await?;
            used = out.used;
        }
        debug_assert_eq!(used, 0);

        send_body(&mut *conn, &mut *buffer, request).await?;
        send_all(&mut *conn, TERMINAL_CHUNK).await?;

        // Response head
        let mut filled = 0;
        let header_end = loop {
            if let Some(end) = find_header_end(&buffer[..filled]) {
                break end;
            }
            if filled == buffer.len() {
                debug!("Response head does not fit into {} bytes", buffer.len());
                return Err(Error::Parse);
            }
            let n = conn.rx(&mut buffer[filled..]).await?;
            if n == 0 {
                return Err(Error::Network);
            }
            filled += n;
        };

        let head = parse_head(&buffer[..header_end])?;
        debug!(
            status = head.status.code(),
            content_length = head.content_length,
            command_id = ?head.command_id,
            keep_alive = head.can_keep_alive,
            "Received response"
        );

        let buffer: &'a [u8] = buffer;
        Ok(Response {
            status: head.status,
            content_type: head.content_type,
            command_id: head.command_id,
            can_keep_alive: head.can_keep_alive,
            body: BodyReader::new(conn, &buffer[header_end..filled], head.content_length),
        })
    }
}

/// Pull the body from the request and emit it as chunks
async fn send_body(
    conn: &mut dyn Connection,
    buffer: &mut [u8],
    request: &mut dyn Request,
) -> Result<(), Error> {
    let capacity = (buffer.len() - CHUNK_PREFIX - CHUNK_SUFFIX).min(MAX_CHUNK);

    loop {
        let (written, done) =
            match request.write_body_chunk(&mut buffer[CHUNK_PREFIX..CHUNK_PREFIX + capacity])? {
                BodyChunk::More(0) => {
                    debug!("Body producer returned an empty partial chunk");
                    return Err(Error::InternalError);
                }
                BodyChunk::More(n) => (n, false),
                BodyChunk::Done(n) => (n, true),
            };
        if written > capacity {
            return Err(Error::InternalError);
        }

        if written > 0 {
            let mut prefix = &mut buffer[..CHUNK_PREFIX];
            write!(prefix, "{written:04X}\r\n").map_err(|_| Error::InternalError)?;
            let end = CHUNK_PREFIX + written;
            buffer[end..end + CHUNK_SUFFIX].copy_from_slice(b"\r\n");
            trace!("Sending body chunk of {} bytes", written);
            send_all(conn, &buffer[..end + CHUNK_SUFFIX]).await?;
        }

        if done {
            return Ok(());
        }
    }
}
