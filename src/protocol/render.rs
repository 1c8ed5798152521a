//! Request bodies and the request the loop sends
//!
//! The body of every request is JSON produced by a pull-style [`Renderer`]:
//! the HTTP client repeatedly offers a buffer and the renderer fills it with
//! the next part of the document.

use super::action::{Action, Event, EventType};
use super::command::CommandId;
use crate::config::Configuration;
use crate::device::{Device, PrinterInfo, FINGERPRINT_SIZE};
use crate::transport::{BodyChunk, ContentType, Error, HeaderOut, Method, Request};
use serde::Serialize;
use std::io;
use tracing::{error, warn};

/// Upper bound for a rendered document
pub const MAX_RENDER_SIZE: usize = 4096;

/// Outcome of one render call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonResult {
    /// Buffer filled, more to come
    Incomplete,
    /// The rest of the document was written
    Complete,
    /// Not even a single byte fits
    BufferTooSmall,
    /// The document could not be produced
    Abort,
}

/// Writer that refuses to grow past a limit
struct BoundedWriter {
    data: Vec<u8>,
    limit: usize,
}

impl io::Write for BoundedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.data.len() + buf.len() > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "document exceeds render limit",
            ));
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pull-style JSON renderer over an already-sampled payload
///
/// The document lives in a caller-provided buffer that can be taken back
/// with [`Renderer::into_buffer`] and handed to the next renderer.
#[derive(Debug)]
pub struct Renderer {
    document: Vec<u8>,
    pos: usize,
    aborted: bool,
}

impl Renderer {
    pub fn new<T: Serialize>(payload: &T) -> Self {
        Self::with_buffer(payload, Vec::new())
    }

    /// Render `payload` into `buffer`, dropping whatever it held
    pub fn with_buffer<T: Serialize>(payload: &T, mut buffer: Vec<u8>) -> Self {
        buffer.clear();
        let mut writer = BoundedWriter {
            data: buffer,
            limit: MAX_RENDER_SIZE,
        };
        let aborted = match serde_json::to_writer(&mut writer, payload) {
            Ok(()) => false,
            Err(e) => {
                warn!("Unable to render request body: {}", e);
                true
            }
        };
        Self {
            document: writer.data,
            pos: 0,
            aborted,
        }
    }

    /// Write the next part of the document into `buffer`
    pub fn render(&mut self, buffer: &mut [u8]) -> (JsonResult, usize) {
        if self.aborted {
            return (JsonResult::Abort, 0);
        }
        let rest = &self.document[self.pos..];
        if rest.is_empty() {
            return (JsonResult::Complete, 0);
        }
        if buffer.is_empty() {
            return (JsonResult::BufferTooSmall, 0);
        }
        let n = rest.len().min(buffer.len());
        buffer[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        if self.pos == self.document.len() {
            (JsonResult::Complete, n)
        } else {
            (JsonResult::Incomplete, n)
        }
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.document
    }
}

#[derive(Debug, Serialize)]
struct InfoData<'a> {
    printer_type: &'a str,
    firmware: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    serial: Option<&'a str>,
    fingerprint: &'a str,
}

#[derive(Debug, Serialize)]
struct EventPayload<'a> {
    event: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_id: Option<CommandId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<InfoData<'a>>,
}

impl<'a> EventPayload<'a> {
    fn new(event: &'a Event, info: &'a PrinterInfo) -> Self {
        let data = (event.event_type == EventType::Info).then(|| InfoData {
            printer_type: &info.printer_type,
            firmware: &info.firmware,
            serial: info.serial.as_deref(),
            fingerprint: info.fingerprint.as_str(),
        });
        Self {
            event: event.event_type,
            command_id: event.command_id,
            reason: event.reason.as_deref(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Rendering,
    Done,
}

/// The request sent for a telemetry or event action
#[derive(Debug)]
pub struct BasicRequest<'a> {
    target_url: &'static str,
    info: &'a PrinterInfo,
    token: &'a str,
    renderer: Renderer,
    progress: Progress,
}

impl<'a> BasicRequest<'a> {
    /// Prepare the request for `action`
    ///
    /// Telemetry is sampled here, so the body reflects the moment the
    /// request was built. A sleep has no request.
    pub fn new(
        device: &dyn Device,
        info: &'a PrinterInfo,
        config: &'a Configuration,
        action: &Action,
    ) -> Result<Self, Error> {
        Self::with_buffer(device, info, config, action, Vec::new())
    }

    /// Like [`BasicRequest::new`], rendering the body into `buffer`
    pub fn with_buffer(
        device: &dyn Device,
        info: &'a PrinterInfo,
        config: &'a Configuration,
        action: &Action,
        buffer: Vec<u8>,
    ) -> Result<Self, Error> {
        let (target_url, renderer) = match action {
            Action::Sleep(_) => {
                error!("A sleep action has no request");
                return Err(Error::InternalError);
            }
            Action::SendTelemetry => (
                "/p/telemetry",
                Renderer::with_buffer(&device.telemetry(), buffer),
            ),
            Action::Event(event) => (
                "/p/events",
                Renderer::with_buffer(&EventPayload::new(event, info), buffer),
            ),
        };

        Ok(Self {
            target_url,
            info,
            token: &config.token,
            renderer,
            progress: Progress::Rendering,
        })
    }

    /// Give back the render buffer for the next request
    pub fn into_buffer(self) -> Vec<u8> {
        self.renderer.into_buffer()
    }
}

impl Request for BasicRequest<'_> {
    fn url(&self) -> &str {
        self.target_url
    }

    fn method(&self) -> Method {
        Method::Post
    }

    fn content_type(&self) -> ContentType {
        ContentType::ApplicationJson
    }

    fn extra_headers(&self) -> Vec<HeaderOut<'_>> {
        vec![
            HeaderOut::with_size(
                "Fingerprint",
                self.info.fingerprint.as_bytes(),
                FINGERPRINT_SIZE,
            ),
            HeaderOut::new("Token", self.token),
        ]
    }

    fn write_body_chunk(&mut self, buffer: &mut [u8]) -> Result<BodyChunk, Error> {
        match self.progress {
            Progress::Done => {
                error!("Body chunk requested after the body was complete");
                Err(Error::InternalError)
            }
            Progress::Rendering => match self.renderer.render(buffer) {
                (JsonResult::Incomplete, written) => Ok(BodyChunk::More(written)),
                (JsonResult::Complete, written) => {
                    self.progress = Progress::Done;
                    Ok(BodyChunk::Done(written))
                }
                // The client hands us a whole buffer each time, so this
                // means even the largest buffer is too small.
                (JsonResult::BufferTooSmall, _) | (JsonResult::Abort, _) => {
                    self.progress = Progress::Done;
                    Err(Error::InternalError)
                }
            },
        }
    }
}
