//! Mock implementations for testing
//!
//! Provides in-memory connections, requests, devices and configuration
//! sources, plus a small canned HTTP server for driving the loop over real
//! sockets without a backend.

use crate::config::{ConfigSource, Configuration};
use crate::device::{CommandOutcome, Device, Fingerprint, PrinterInfo, PrinterState, Telemetry};
use crate::protocol::CommandData;
use crate::transport::{
    BodyChunk, Connection, ConnectionFactory, ContentType, Error, HeaderOut, Method, Request,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const REQUEST_TERMINATOR: &[u8] = b"0000\r\n\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Printer description used throughout the tests
pub fn test_printer_info() -> PrinterInfo {
    PrinterInfo {
        printer_type: "MK4".to_string(),
        firmware: "6.0.0".to_string(),
        serial: Some("SN123".to_string()),
        fingerprint: Fingerprint::new(*b"0123456789abcdef"),
    }
}

/// In-memory connection with a scripted receive side
///
/// Everything written is captured. Once the script is exhausted, reads
/// return 0 as if the peer closed the stream.
#[derive(Debug, Default)]
pub struct MockConnection {
    incoming: Vec<u8>,
    read_pos: usize,
    rx_chunk: Option<usize>,
    tx_chunk: Option<usize>,
    connect_error: Option<Error>,
    rx_error: Option<Error>,
    sent: Vec<u8>,
    rx_calls: usize,
    connected_to: Option<(String, u16)>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(raw: &[u8]) -> Self {
        Self {
            incoming: raw.to_vec(),
            ..Self::default()
        }
    }

    /// Hand out at most `n` bytes per read
    pub fn with_rx_chunk(mut self, n: usize) -> Self {
        self.rx_chunk = Some(n);
        self
    }

    /// Accept at most `n` bytes per write
    pub fn with_tx_chunk(mut self, n: usize) -> Self {
        self.tx_chunk = Some(n);
        self
    }

    pub fn with_connect_error(mut self, error: Error) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Fail every read once the script is exhausted
    pub fn with_rx_error(mut self, error: Error) -> Self {
        self.rx_error = Some(error);
        self
    }

    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    pub fn rx_calls(&self) -> usize {
        self.rx_calls
    }

    pub fn connected_to(&self) -> Option<(&str, u16)> {
        self.connected_to
            .as_ref()
            .map(|(host, port)| (host.as_str(), *port))
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        if let Some(error) = self.connect_error {
            return Err(error);
        }
        self.connected_to = Some((host.to_string(), port));
        Ok(())
    }

    async fn tx(&mut self, data: &[u8]) -> Result<usize, Error> {
        let n = self.tx_chunk.map_or(data.len(), |chunk| chunk.min(data.len()));
        self.sent.extend_from_slice(&data[..n]);
        Ok(n)
    }

    async fn rx(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        self.rx_calls += 1;
        let rest = &self.incoming[self.read_pos..];
        if rest.is_empty() {
            return match self.rx_error {
                Some(error) => Err(error),
                None => Ok(0),
            };
        }
        let n = rest
            .len()
            .min(buffer.len())
            .min(self.rx_chunk.unwrap_or(usize::MAX));
        buffer[..n].copy_from_slice(&rest[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

/// Factory around a single [`MockConnection`]
#[derive(Debug)]
pub struct MockFactory {
    pub conn: MockConnection,
    host: String,
    pending_error: Option<Error>,
    invalidations: usize,
}

impl MockFactory {
    pub fn new(conn: MockConnection) -> Self {
        Self {
            conn,
            host: "connect.example.com".to_string(),
            pending_error: None,
            invalidations: 0,
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Report `error` on the next connection request only
    pub fn with_error(mut self, error: Error) -> Self {
        self.pending_error = Some(error);
        self
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations
    }
}

impl ConnectionFactory for MockFactory {
    fn connection(&mut self) -> Result<&mut dyn Connection, Error> {
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }
        Ok(&mut self.conn)
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn invalidate(&mut self) {
        self.invalidations += 1;
    }
}

/// Request with a fixed body, produced in configurable pieces
#[derive(Debug)]
pub struct MockRequest {
    url: String,
    method: Method,
    content_type: ContentType,
    headers: Vec<(String, Vec<u8>, Option<usize>)>,
    body: Vec<u8>,
    pos: usize,
    max_chunk: Option<usize>,
    done: bool,
    chunk_calls: usize,
    calls_after_done: usize,
}

impl MockRequest {
    pub fn json(url: &str, body: &[u8]) -> Self {
        Self {
            url: url.to_string(),
            method: Method::Post,
            content_type: ContentType::ApplicationJson,
            headers: Vec::new(),
            body: body.to_vec(),
            pos: 0,
            max_chunk: None,
            done: false,
            chunk_calls: 0,
            calls_after_done: 0,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_header(mut self, name: &str, value: &[u8]) -> Self {
        self.headers.push((name.to_string(), value.to_vec(), None));
        self
    }

    pub fn with_sized_header(mut self, name: &str, value: &[u8], size: usize) -> Self {
        self.headers
            .push((name.to_string(), value.to_vec(), Some(size)));
        self
    }

    /// Produce at most `n` body bytes per call
    pub fn with_max_chunk(mut self, n: usize) -> Self {
        self.max_chunk = Some(n);
        self
    }

    pub fn chunk_calls(&self) -> usize {
        self.chunk_calls
    }

    /// Times the body was asked for after it reported completion
    pub fn calls_after_done(&self) -> usize {
        self.calls_after_done
    }
}

impl Request for MockRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn method(&self) -> Method {
        self.method
    }

    fn content_type(&self) -> ContentType {
        self.content_type
    }

    fn extra_headers(&self) -> Vec<HeaderOut<'_>> {
        self.headers
            .iter()
            .map(|(name, value, size)| HeaderOut {
                name: name.as_str(),
                value: value.as_slice(),
                size: *size,
            })
            .collect()
    }

    fn write_body_chunk(&mut self, buffer: &mut [u8]) -> Result<BodyChunk, Error> {
        self.chunk_calls += 1;
        if self.done {
            self.calls_after_done += 1;
            return Err(Error::InternalError);
        }

        let rest = &self.body[self.pos..];
        let n = rest
            .len()
            .min(buffer.len())
            .min(self.max_chunk.unwrap_or(usize::MAX));
        buffer[..n].copy_from_slice(&rest[..n]);
        self.pos += n;

        if self.pos == self.body.len() {
            self.done = true;
            Ok(BodyChunk::Done(n))
        } else {
            Ok(BodyChunk::More(n))
        }
    }
}

/// Device that records commands and answers with a fixed outcome
#[derive(Debug)]
pub struct MockDevice {
    info: PrinterInfo,
    telemetry: Telemetry,
    outcome: CommandOutcome,
    executed: Arc<Mutex<Vec<CommandData>>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            info: test_printer_info(),
            telemetry: Telemetry {
                state: PrinterState::Printing,
                temp_nozzle: Some(215.0),
                temp_bed: Some(60.0),
                target_nozzle: Some(215.0),
                target_bed: Some(60.0),
                progress: Some(42),
                job_path: Some("/usb/box.gcode".to_string()),
            },
            outcome: CommandOutcome::Finished,
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_outcome(mut self, outcome: CommandOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_info(mut self, info: PrinterInfo) -> Self {
        self.info = info;
        self
    }

    /// Commands handed to the device so far
    pub fn executed(&self) -> Vec<CommandData> {
        lock(&self.executed).clone()
    }
}

impl Device for MockDevice {
    fn printer_info(&self) -> PrinterInfo {
        self.info.clone()
    }

    fn telemetry(&self) -> Telemetry {
        self.telemetry.clone()
    }

    fn execute(&self, command: &CommandData) -> CommandOutcome {
        lock(&self.executed).push(command.clone());
        self.outcome.clone()
    }
}

/// Configuration source the test can change between iterations
#[derive(Debug, Clone)]
pub struct StaticConfigSource {
    config: Arc<Mutex<Configuration>>,
    reads: Arc<AtomicUsize>,
}

impl StaticConfigSource {
    pub fn new(config: Configuration) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, config: Configuration) {
        *lock(&self.config) = config;
    }

    pub fn update<F: FnOnce(&mut Configuration)>(&self, f: F) {
        f(&mut lock(&self.config));
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ConfigSource for StaticConfigSource {
    fn connect_config(&mut self) -> Configuration {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.config).clone()
    }
}

/// Plain HTTP server on localhost answering with queued canned responses
///
/// Each complete request (headers plus chunked body) takes the next response
/// from the queue. The connection is closed when the queue is empty or the
/// response carries `Connection: close`.
#[derive(Debug)]
pub struct CannedServer {
    addr: SocketAddr,
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl CannedServer {
    pub async fn start(responses: &[&[u8]]) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let responses = Arc::new(Mutex::new(
            responses.iter().map(|r| r.to_vec()).collect::<VecDeque<_>>(),
        ));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn({
            let responses = responses.clone();
            let requests = requests.clone();
            let connections = connections.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(
                        stream,
                        responses.clone(),
                        requests.clone(),
                    ));
                }
            }
        });

        Ok(Self {
            addr,
            responses,
            requests,
            connections,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn push_response(&self, response: &[u8]) {
        lock(&self.responses).push_back(response.to_vec());
    }

    /// Raw bytes of every request received so far
    pub fn requests(&self) -> Vec<Vec<u8>> {
        lock(&self.requests).clone()
    }

    /// Accepted TCP connections so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for CannedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Length of the first complete chunked request in `data`
fn request_len(data: &[u8]) -> Option<usize> {
    let header_end = find(data, HEADER_END)? + HEADER_END.len();
    let body_end = find(&data[header_end..], REQUEST_TERMINATOR)?;
    Some(header_end + body_end + REQUEST_TERMINATOR.len())
}

async fn serve_connection(
    mut stream: TcpStream,
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
) {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let len = loop {
            if let Some(len) = request_len(&data) {
                break len;
            }
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => data.extend_from_slice(&chunk[..n]),
            }
        };
        lock(&requests).push(data.drain(..len).collect());

        let next = lock(&responses).pop_front();
        let Some(response) = next else {
            return;
        };
        if stream.write_all(&response).await.is_err() {
            return;
        }
        let closing = String::from_utf8_lossy(&response)
            .to_ascii_lowercase()
            .contains("connection: close");
        if closing {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_len() {
        let request = b"POST / HTTP/1.1\r\nHost: x\r\n\r\n0002\r\n{}\r\n0000\r\n\r\nPOST";
        assert_eq!(request_len(request), Some(request.len() - 4));
        assert_eq!(request_len(b"POST / HTTP/1.1\r\nHost: x\r\n\r\n0002\r\n{}"), None);
    }

    #[tokio::test]
    async fn test_mock_connection_script() {
        let mut conn = MockConnection::with_response(b"abcdef").with_rx_chunk(4);
        let mut buffer = [0u8; 16];
        assert_eq!(conn.rx(&mut buffer).await, Ok(4));
        assert_eq!(conn.rx(&mut buffer).await, Ok(2));
        assert_eq!(conn.rx(&mut buffer).await, Ok(0));
        assert_eq!(conn.rx_calls(), 3);

        assert_eq!(conn.tx(b"hello").await, Ok(5));
        assert_eq!(conn.sent(), b"hello");
    }

    #[tokio::test]
    async fn test_mock_request_pieces() {
        let mut request = MockRequest::json("/", b"abcde").with_max_chunk(2);
        let mut buffer = [0u8; 8];
        assert_eq!(request.write_body_chunk(&mut buffer), Ok(BodyChunk::More(2)));
        assert_eq!(request.write_body_chunk(&mut buffer), Ok(BodyChunk::More(2)));
        assert_eq!(request.write_body_chunk(&mut buffer), Ok(BodyChunk::Done(1)));
        assert!(request.write_body_chunk(&mut buffer).is_err());
        assert_eq!(request.calls_after_done(), 1);
    }

    #[test]
    fn test_static_config_source_shares_updates() {
        let source = StaticConfigSource::new(Configuration::default());
        let mut reader = source.clone();
        source.update(|c| c.host = "example.com".to_string());
        assert_eq!(reader.connect_config().host, "example.com");
        assert_eq!(source.reads(), 1);
    }
}
