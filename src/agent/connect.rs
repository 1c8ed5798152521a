//! The control-channel loop
//!
//! [`Connect::communicate`] runs one iteration:
//!
//! 1. read the server settings; when disabled or unconfigured, reset the
//!    planner, idle and report `Off` / `NoConfig`
//! 2. ask the planner what to do; a sleep is just slept, with no status
//! 3. drop the cached connection if the settings changed
//! 4. make sure the cache holds a connection (or the error making one)
//! 5. build the request and run the exchange
//! 6. turn the outcome into an action result, maybe a command, and a status
//!
//! Nothing that goes wrong in an exchange escapes the iteration.

use crate::agent::planner::{Planner, PlannerConfig};
use crate::agent::status::{err_to_status, publish_status, OnlineStatus};
use crate::config::{ConfigSource, Configuration, TimingSection};
use crate::device::{Device, PrinterInfo};
use crate::observability::metrics;
use crate::protocol::{
    Action, ActionResult, BasicRequest, Command, CommandId, MAX_RENDER_SIZE,
};
use crate::transport::{
    CachedConnection, Connection, ConnectionCache, ConnectionFactory, Error, HttpClient,
    PlainConnection, Response, Status, TlsConnection,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn, Instrument};

/// Pause used while disabled or unconfigured, and once at startup
pub const IDLE_WAIT: Duration = Duration::from_millis(1000);

/// Largest command body accepted from the server
pub const MAX_RESP_SIZE: usize = 512;

/// What an exchange amounts to, decided while the response is still alive
/// and applied after it is gone
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Verdict {
    pub result: ActionResult,
    pub command: Option<Command>,
    pub invalidate: bool,
    pub status: OnlineStatus,
}

impl Verdict {
    fn new(result: ActionResult, status: OnlineStatus, invalidate: bool) -> Self {
        Self {
            result,
            command: None,
            invalidate,
            status,
        }
    }

    fn transport_error(error: Error) -> Self {
        Self::new(ActionResult::Failed, err_to_status(error), true)
    }
}

/// Read a command body and interpret it by content type
async fn read_command(
    response: &mut Response<'_>,
    id: CommandId,
    buffer: &mut [u8],
) -> Result<Command, Error> {
    let len = response.read_body_to_end(buffer).await?;
    Ok(Command::from_body(id, response.content_type, &buffer[..len]))
}

/// Decide what a response means
///
/// `buffer` receives command bodies. Any response that leaves the connection
/// in an unknown state (not keep-alive, or body left unread) invalidates it.
pub(crate) async fn dispatch_response(response: &mut Response<'_>, buffer: &mut [u8]) -> Verdict {
    let mut verdict = match response.status {
        Status::NoContent => Verdict::new(ActionResult::Ok, OnlineStatus::Ok, false),
        Status::Ok => match response.command_id {
            Some(id) => match read_command(response, id, buffer).await {
                Ok(command) => Verdict {
                    command: Some(command),
                    ..Verdict::new(ActionResult::Ok, OnlineStatus::Ok, false)
                },
                Err(e) => {
                    warn!("Failed to read command {}: {}", id, e);
                    Verdict {
                        command: Some(Command::broken(id, e.to_string())),
                        ..Verdict::new(ActionResult::Failed, err_to_status(e), true)
                    }
                }
            },
            None => {
                warn!("Server answered 200 without a command id");
                Verdict::new(ActionResult::Refused, OnlineStatus::Confused, true)
            }
        },
        Status::RequestTimeout
        | Status::TooManyRequests
        | Status::ServiceUnavailable
        | Status::GatewayTimeout => {
            info!("Server is busy ({}), will retry", response.status);
            Verdict::new(ActionResult::Failed, OnlineStatus::ServerError, true)
        }
        Status::Unauthorized | Status::Forbidden => {
            warn!("Server rejected our credentials ({})", response.status);
            Verdict::new(ActionResult::Refused, OnlineStatus::Auth, true)
        }
        Status::BadRequest => {
            warn!("Server rejected our request as malformed");
            Verdict::new(ActionResult::Refused, OnlineStatus::InternalError, true)
        }
        Status::NotFound | Status::InternalServerError | Status::Other(_) => {
            warn!("Server refused the request with {}", response.status);
            Verdict::new(ActionResult::Refused, OnlineStatus::ServerError, true)
        }
    };

    if !response.can_keep_alive || response.content_length() > 0 {
        verdict.invalidate = true;
    }
    verdict
}

/// Open a connection of the kind `config` asks for
async fn establish(config: &Configuration, io_timeout: Duration) -> CachedConnection {
    let result = if config.tls {
        let mut conn = TlsConnection::new(io_timeout);
        conn.connect(&config.host, config.port)
            .await
            .map(|()| CachedConnection::Tls(conn))
    } else {
        let mut conn = PlainConnection::new(io_timeout);
        conn.connect(&config.host, config.port)
            .await
            .map(|()| CachedConnection::Plain(conn))
    };

    match result {
        Ok(connection) => {
            metrics().record_connection(true);
            info!(
                "Connected to {}:{} ({})",
                config.host,
                config.port,
                if config.tls { "tls" } else { "plain" }
            );
            connection
        }
        Err(e) => {
            metrics().record_connection(false);
            warn!("Unable to connect to {}:{}: {}", config.host, config.port, e);
            CachedConnection::Failed(e)
        }
    }
}

/// Run one exchange; the response never outlives this call
async fn exchange(
    http: &mut HttpClient,
    cache: &mut ConnectionCache,
    buffer: &mut [u8],
    request: &mut BasicRequest<'_>,
) -> Verdict {
    match http.send(cache, request).await {
        Ok(mut response) => dispatch_response(&mut response, buffer).await,
        Err(e) => {
            warn!("Exchange failed: {}", e);
            Verdict::transport_error(e)
        }
    }
}

/// Owns everything the control channel needs between iterations
pub struct Connect<C: ConfigSource> {
    config_source: C,
    device: Arc<dyn Device>,
    printer_info: PrinterInfo,
    planner: Planner,
    cache: ConnectionCache,
    http: HttpClient,
    io_timeout: Duration,
    idle_wait: Duration,
    recv_buffer: Box<[u8]>,
    render_buffer: Vec<u8>,
}

impl<C: ConfigSource> Connect<C> {
    pub fn new(config_source: C, device: Arc<dyn Device>, timing: &TimingSection) -> Self {
        let printer_info = device.printer_info();
        Self {
            config_source,
            planner: Planner::new(device.clone(), PlannerConfig::from(timing)),
            device,
            printer_info,
            cache: ConnectionCache::new(),
            http: HttpClient::new(),
            io_timeout: timing.io_timeout(),
            idle_wait: IDLE_WAIT,
            recv_buffer: vec![0u8; MAX_RESP_SIZE].into_boxed_slice(),
            render_buffer: Vec::with_capacity(MAX_RENDER_SIZE),
        }
    }

    /// Override the idle pause (tests use a short one)
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// One loop iteration
    ///
    /// Returns the status it amounts to, or `None` when the planner only
    /// asked to sleep.
    pub async fn communicate(&mut self) -> Option<OnlineStatus> {
        let config = self.config_source.connect_config();

        if !config.enabled {
            self.planner.reset();
            sleep(self.idle_wait).await;
            return Some(OnlineStatus::Off);
        }
        if !config.is_configured() {
            self.planner.reset();
            sleep(self.idle_wait).await;
            return Some(OnlineStatus::NoConfig);
        }

        let action = self.planner.next_action();
        if let Action::Sleep(duration) = action {
            debug!("Nothing to do for {:?}", duration);
            sleep(duration).await;
            return None;
        }

        self.cache.check_fingerprint(config.fingerprint());
        let io_timeout = self.io_timeout;
        self.cache
            .refresh(&config.host, || establish(&config, io_timeout))
            .await;

        let mut request = match BasicRequest::with_buffer(
            self.device.as_ref(),
            &self.printer_info,
            &config,
            &action,
            std::mem::take(&mut self.render_buffer),
        ) {
            Ok(request) => request,
            Err(e) => {
                self.planner.action_done(ActionResult::Failed);
                return Some(err_to_status(e));
            }
        };

        let span = crate::exchange_span!(
            url = request_url(&action),
            host = %config.host,
            port = config.port
        );
        metrics().record_exchange_attempt();
        let started = Instant::now();
        let verdict = exchange(
            &mut self.http,
            &mut self.cache,
            &mut self.recv_buffer,
            &mut request,
        )
        .instrument(span)
        .await;
        self.render_buffer = request.into_buffer();

        if verdict.status == OnlineStatus::Ok {
            metrics().record_exchange_success(started.elapsed());
        } else {
            metrics().record_exchange_failure(started.elapsed());
        }

        self.planner.action_done(verdict.result);
        if let Some(command) = verdict.command {
            metrics().record_command();
            info!("Received command {}", command.id);
            self.planner.command(command);
        }
        if verdict.invalidate {
            self.cache.invalidate();
        }

        Some(verdict.status)
    }

    /// One iteration, publishing its status
    pub async fn step(&mut self) -> Option<OnlineStatus> {
        let status = self.communicate().await?;
        let previous = publish_status(status);
        if previous != status {
            metrics().record_status_change();
            info!("Online status changed: {} -> {}", previous, status);
        }
        Some(status)
    }

    /// Run until the surrounding task is dropped
    pub async fn run(&mut self) {
        info!("Control channel starting");
        sleep(self.idle_wait).await;
        loop {
            self.step().await;
        }
    }
}

fn request_url(action: &Action) -> &'static str {
    match action {
        Action::SendTelemetry => "/p/telemetry",
        Action::Event(_) => "/p/events",
        Action::Sleep(_) => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{MockConnection, MockFactory, MockRequest};

    async fn verdict_for(raw: &[u8]) -> Verdict {
        let mut factory = MockFactory::new(MockConnection::with_response(raw));
        let mut http = HttpClient::new();
        let mut request = MockRequest::json("/p/telemetry", b"{}");
        let mut buffer = [0u8; MAX_RESP_SIZE];
        let mut response = http.send(&mut factory, &mut request).await.unwrap();
        dispatch_response(&mut response, &mut buffer).await
    }

    #[tokio::test]
    async fn test_no_content_is_ok() {
        let verdict = verdict_for(b"HTTP/1.1 204 No Content\r\n\r\n").await;
        assert_eq!(
            verdict,
            Verdict::new(ActionResult::Ok, OnlineStatus::Ok, false)
        );
    }

    #[tokio::test]
    async fn test_no_content_close_invalidates() {
        let verdict = verdict_for(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await;
        assert_eq!(verdict.result, ActionResult::Ok);
        assert_eq!(verdict.status, OnlineStatus::Ok);
        assert!(verdict.invalidate);
    }

    #[tokio::test]
    async fn test_command_delivered() {
        let verdict = verdict_for(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/x.gcode\r\nCommand-Id: 42\r\nContent-Length: 3\r\n\r\nG28",
        )
        .await;

        assert_eq!(verdict.result, ActionResult::Ok);
        assert_eq!(verdict.status, OnlineStatus::Ok);
        assert!(!verdict.invalidate);
        assert_eq!(
            verdict.command,
            Some(Command {
                id: CommandId(42),
                data: crate::protocol::CommandData::Gcode("G28".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn test_unparsable_command_still_ok() {
        let verdict = verdict_for(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nCommand-Id: 5\r\nContent-Length: 5\r\n\r\nnope!",
        )
        .await;

        assert_eq!(verdict.result, ActionResult::Ok);
        assert!(matches!(
            verdict.command.map(|c| c.data),
            Some(crate::protocol::CommandData::Broken { .. })
        ));
    }

    #[tokio::test]
    async fn test_command_too_long() {
        let verdict = verdict_for(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/x.gcode\r\nCommand-Id: 9\r\nContent-Length: 4096\r\n\r\n",
        )
        .await;

        assert_eq!(verdict.result, ActionResult::Failed);
        assert_eq!(verdict.status, OnlineStatus::InternalError);
        assert!(verdict.invalidate);
        let command = verdict.command.unwrap();
        assert_eq!(command.id, CommandId(9));
        assert!(matches!(
            command.data,
            crate::protocol::CommandData::Broken { .. }
        ));
    }

    #[tokio::test]
    async fn test_command_body_cut_short() {
        let verdict = verdict_for(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/x.gcode\r\nCommand-Id: 9\r\nContent-Length: 10\r\n\r\nG28",
        )
        .await;

        assert_eq!(verdict.result, ActionResult::Failed);
        assert_eq!(verdict.status, OnlineStatus::NetworkError);
        assert!(verdict.invalidate);
        assert!(verdict.command.is_some());
    }

    #[tokio::test]
    async fn test_ok_without_command_id_is_confused() {
        let verdict = verdict_for(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
        assert_eq!(
            verdict,
            Verdict::new(ActionResult::Refused, OnlineStatus::Confused, true)
        );
    }

    #[tokio::test]
    async fn test_status_code_table() {
        let cases = [
            (408, ActionResult::Failed, OnlineStatus::ServerError),
            (429, ActionResult::Failed, OnlineStatus::ServerError),
            (503, ActionResult::Failed, OnlineStatus::ServerError),
            (504, ActionResult::Failed, OnlineStatus::ServerError),
            (400, ActionResult::Refused, OnlineStatus::InternalError),
            (401, ActionResult::Refused, OnlineStatus::Auth),
            (403, ActionResult::Refused, OnlineStatus::Auth),
            (404, ActionResult::Refused, OnlineStatus::ServerError),
            (500, ActionResult::Refused, OnlineStatus::ServerError),
            (302, ActionResult::Refused, OnlineStatus::ServerError),
        ];

        for (code, result, status) in cases {
            let raw = format!("HTTP/1.1 {code} Whatever\r\n\r\n");
            let verdict = verdict_for(raw.as_bytes()).await;
            assert_eq!(verdict, Verdict::new(result, status, true), "code {code}");
        }
    }

    #[tokio::test]
    async fn test_unread_body_invalidates() {
        let verdict =
            verdict_for(b"HTTP/1.1 204 No Content\r\nContent-Length: 4\r\n\r\njunk").await;
        assert_eq!(verdict.result, ActionResult::Ok);
        assert!(verdict.invalidate);
    }

    #[test]
    fn test_transport_error_verdict() {
        let verdict = Verdict::transport_error(Error::Dns);
        assert_eq!(verdict.result, ActionResult::Failed);
        assert_eq!(verdict.status, OnlineStatus::NoDns);
        assert!(verdict.invalidate);
        assert!(verdict.command.is_none());
    }

    #[tokio::test]
    async fn test_establish_reports_failure_in_slot() {
        let config = Configuration {
            host: "127.0.0.1".to_string(),
            token: "t".to_string(),
            port: 1,
            tls: false,
            enabled: true,
        };
        let slot = establish(&config, Duration::from_millis(500)).await;
        assert!(matches!(slot, CachedConnection::Failed(Error::Connect)));
    }

    #[tokio::test]
    async fn test_render_buffer_survives_iterations() {
        use crate::testing::{CannedServer, MockDevice, StaticConfigSource};

        let no_content: &[u8] = b"HTTP/1.1 204 No Content\r\n\r\n";
        let server = CannedServer::start(&[no_content, no_content]).await.unwrap();
        let config = Configuration {
            host: "127.0.0.1".to_string(),
            token: "t".to_string(),
            port: server.port(),
            tls: false,
            enabled: true,
        };
        let mut connect = Connect::new(
            StaticConfigSource::new(config),
            Arc::new(MockDevice::new()),
            &TimingSection::default(),
        );
        let ptr = connect.render_buffer.as_ptr();

        assert_eq!(connect.communicate().await, Some(OnlineStatus::Ok));
        assert_eq!(connect.communicate().await, Some(OnlineStatus::Ok));

        assert_eq!(connect.render_buffer.as_ptr(), ptr);
        assert!(connect.render_buffer.capacity() >= MAX_RENDER_SIZE);
        assert_eq!(server.requests().len(), 2);
    }
}
