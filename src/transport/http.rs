//! HTTP vocabulary shared by requests and responses
//!
//! Plain data types describing what goes over the wire. The client in
//! [`super::client`] turns them into bytes and back.

use super::Error;
use std::fmt;

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Media types the protocol distinguishes
///
/// Anything not recognised is treated as opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ApplicationJson,
    TextGcode,
    TextPlain,
    ApplicationOctetStream,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::ApplicationJson => "application/json",
            ContentType::TextGcode => "text/x.gcode",
            ContentType::TextPlain => "text/plain",
            ContentType::ApplicationOctetStream => "application/octet-stream",
        }
    }

    /// Parse a `Content-Type` header value, ignoring any parameters
    pub fn parse(value: &str) -> Self {
        let mime = value.split(';').next().unwrap_or("").trim();
        if mime.eq_ignore_ascii_case("application/json") {
            ContentType::ApplicationJson
        } else if mime.eq_ignore_ascii_case("text/x.gcode") {
            ContentType::TextGcode
        } else if mime.eq_ignore_ascii_case("text/plain") {
            ContentType::TextPlain
        } else {
            ContentType::ApplicationOctetStream
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status codes the agent reacts to
///
/// Codes without their own handling are kept in [`Status::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NoContent,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RequestTimeout,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    GatewayTimeout,
    Other(u16),
}

impl Status {
    pub fn from_code(code: u16) -> Self {
        match code {
            200 => Status::Ok,
            204 => Status::NoContent,
            400 => Status::BadRequest,
            401 => Status::Unauthorized,
            403 => Status::Forbidden,
            404 => Status::NotFound,
            408 => Status::RequestTimeout,
            429 => Status::TooManyRequests,
            500 => Status::InternalServerError,
            503 => Status::ServiceUnavailable,
            504 => Status::GatewayTimeout,
            other => Status::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NoContent => 204,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::RequestTimeout => 408,
            Status::TooManyRequests => 429,
            Status::InternalServerError => 500,
            Status::ServiceUnavailable => 503,
            Status::GatewayTimeout => 504,
            Status::Other(code) => *code,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// An extra request header
///
/// When `size` is set only that many bytes of `value` go on the wire, which
/// lets callers pass fixed-size identifiers that are not text-terminated.
#[derive(Debug, Clone, Copy)]
pub struct HeaderOut<'a> {
    pub name: &'a str,
    pub value: &'a [u8],
    pub size: Option<usize>,
}

impl<'a> HeaderOut<'a> {
    pub fn new(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            value: value.as_bytes(),
            size: None,
        }
    }

    pub fn with_size(name: &'a str, value: &'a [u8], size: usize) -> Self {
        Self {
            name,
            value,
            size: Some(size),
        }
    }

    /// The bytes that are actually sent for the value
    pub fn wire_value(&self) -> &'a [u8] {
        match self.size {
            Some(size) => &self.value[..size.min(self.value.len())],
            None => self.value,
        }
    }
}

/// Outcome of one body-producer call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyChunk {
    /// Wrote this many bytes, more will follow
    More(usize),
    /// Wrote this many bytes and the body is complete
    Done(usize),
}

/// A request the client can send
///
/// The body is pulled piecewise into a buffer owned by the client, so its
/// length never has to be known up front. After
/// [`write_body_chunk`](Request::write_body_chunk) returns
/// [`BodyChunk::Done`] it is not called again.
pub trait Request: Send {
    fn url(&self) -> &str;

    fn method(&self) -> Method;

    fn content_type(&self) -> ContentType;

    fn extra_headers(&self) -> Vec<HeaderOut<'_>> {
        Vec::new()
    }

    fn write_body_chunk(&mut self, buffer: &mut [u8]) -> Result<BodyChunk, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parse() {
        assert_eq!(
            ContentType::parse("application/json"),
            ContentType::ApplicationJson
        );
        assert_eq!(
            ContentType::parse("Application/JSON; charset=utf-8"),
            ContentType::ApplicationJson
        );
        assert_eq!(ContentType::parse("text/x.gcode"), ContentType::TextGcode);
        assert_eq!(ContentType::parse(" text/plain "), ContentType::TextPlain);
        assert_eq!(
            ContentType::parse("image/png"),
            ContentType::ApplicationOctetStream
        );
        assert_eq!(ContentType::parse(""), ContentType::ApplicationOctetStream);
    }

    #[test]
    fn test_status_codes() {
        for code in [200, 204, 400, 401, 403, 404, 408, 429, 500, 503, 504, 302, 418] {
            assert_eq!(Status::from_code(code).code(), code);
        }
        assert_eq!(Status::from_code(429), Status::TooManyRequests);
        assert_eq!(Status::from_code(418), Status::Other(418));
    }

    #[test]
    fn test_header_wire_value_respects_explicit_size() {
        let raw = *b"0123456789abcdefXXXX";
        let header = HeaderOut::with_size("Fingerprint", &raw, 16);
        assert_eq!(header.wire_value(), b"0123456789abcdef");

        let header = HeaderOut::new("Token", "secret");
        assert_eq!(header.wire_value(), b"secret");

        // A size beyond the value is clamped rather than read out of bounds
        let header = HeaderOut::with_size("Short", b"abc", 10);
        assert_eq!(header.wire_value(), b"abc");
    }
}
