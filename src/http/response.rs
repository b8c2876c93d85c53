//! HTTP/1.1 responses and their exact wire representation.
//!
//! [`Response::dump`] writes a response the way it appears on the wire
//! (status line, headers, body) and [`Response::parse`] reads those bytes
//! back. Header spelling, header order and the reason phrase survive the
//! round trip unchanged.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Body, Headers, Method, StatusCode};

/// Errors produced while serializing or parsing a response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("body truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("malformed chunked body")]
    InvalidChunk,

    #[error("Content-Length declares {declared} bytes but the body has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("I/O error reading body: {0}")]
    Io(#[from] io::Error),
}

impl From<httparse::InvalidChunkSize> for ResponseError {
    fn from(_: httparse::InvalidChunkSize) -> Self {
        ResponseError::InvalidChunk
    }
}

/// An HTTP/1.x response.
///
/// # Examples
///
/// ```
/// use replay::http::{Method, Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let wire = response.dump(&Method::Get).await?;
/// assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));
///
/// let restored = Response::parse(&wire, &Method::Get)?;
/// assert_eq!(restored.status(), StatusCode::OK);
/// assert_eq!(restored.headers(), response.headers());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    status: StatusCode,
    reason: String,
    headers: Headers,
    body: Body,
}

impl Response {
    /// Header slots tried first when parsing; doubled while too few.
    const INITIAL_HEADERS: usize = 64;

    /// Creates an HTTP/1.1 response with the canonical reason phrase and an
    /// empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: 1,
            status,
            reason: status.canonical_reason().unwrap_or_default().to_owned(),
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a buffered body and a matching `Content-Length` header.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.headers.set("Content-Length", body.len().to_string());
        self.body = Body::Full(body);
        self
    }

    /// Replaces the body without touching any headers.
    ///
    /// Useful for streaming bodies, where the caller is responsible for
    /// framing (`Content-Length` or `Transfer-Encoding: chunked`).
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Overrides the reason phrase.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the reason phrase exactly as it was received or set.
    pub fn reason_phrase(&self) -> &str {
        &self.reason
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Reads the whole body, leaving a replayable copy attached.
    pub async fn bytes(&mut self) -> io::Result<Bytes> {
        self.body.buffer().await
    }

    /// Serializes the full response into its wire representation.
    ///
    /// A streaming body is drained first and re-attached as a buffered body,
    /// so the response remains readable afterwards. When the headers declare
    /// `Transfer-Encoding: chunked`, the body is written as a single chunk
    /// followed by the terminating zero-size chunk.
    ///
    /// `method` is the method of the request this response answers, as for
    /// [`Response::parse`].
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Io`] — draining a streaming body failed.
    /// - [`ResponseError::LengthMismatch`] — a body is allowed but its length
    ///   differs from the declared `Content-Length`, so the bytes would not
    ///   parse back to the same body.
    pub async fn dump(&mut self, method: &Method) -> Result<Bytes, ResponseError> {
        let body = self.body.buffer().await?;

        let carries_body = *method != Method::Head && !self.status.forbids_body();
        if carries_body && !self.headers.is_chunked() {
            if let Some(declared) = self.headers.content_length() {
                if declared != body.len() {
                    return Err(ResponseError::LengthMismatch {
                        declared,
                        actual: body.len(),
                    });
                }
            }
        }

        let estimated_size = 64 + self.reason.len() + self.headers.len() * 64 + body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "HTTP/1.{} {} {}\r\n",
                self.version,
                self.status.as_u16(),
                self.reason
            )
            .as_bytes(),
        );

        self.headers.write_to(&mut buf);
        buf.put(&b"\r\n"[..]);

        if self.headers.is_chunked() {
            if !body.is_empty() {
                buf.put(format!("{:x}\r\n", body.len()).as_bytes());
                buf.put_slice(&body);
                buf.put(&b"\r\n"[..]);
            }
            buf.put(&b"0\r\n\r\n"[..]);
        } else {
            buf.put_slice(&body);
        }

        Ok(buf.freeze())
    }

    /// Parses a complete serialized response.
    ///
    /// `method` is the method of the request this response answers; a
    /// response to `HEAD` never has a body, whatever its headers claim.
    /// Without `Content-Length` or chunked framing, the rest of `buf` is the
    /// body.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — the head or a chunked body is cut short.
    /// - [`ResponseError::Truncated`] — fewer body bytes than `Content-Length`.
    /// - [`ResponseError::Parse`], [`ResponseError::InvalidStatus`],
    ///   [`ResponseError::InvalidChunk`] — the bytes are not a valid response.
    pub fn parse(buf: &[u8], method: &Method) -> Result<Self, ResponseError> {
        Self::decode(buf, method, true).map(|(response, _)| response)
    }

    /// Parses a response from a buffer that may still be growing.
    ///
    /// Returns the response and the number of bytes it occupies. A response
    /// whose body is delimited by connection close is reported as
    /// [`ResponseError::Incomplete`] unless `eof` is set.
    pub(crate) fn decode(
        buf: &[u8],
        method: &Method,
        eof: bool,
    ) -> Result<(Self, usize), ResponseError> {
        let mut slots = Self::INITIAL_HEADERS;
        loop {
            let mut headers = vec![httparse::EMPTY_HEADER; slots];
            match Self::decode_with(buf, method, eof, &mut headers) {
                // Every header line takes at least three bytes, so a buffer
                // can never need more slots than it has bytes.
                Err(ResponseError::Parse(httparse::Error::TooManyHeaders))
                    if slots < buf.len() =>
                {
                    slots *= 2;
                }
                result => return result,
            }
        }
    }

    fn decode_with<'b>(
        buf: &'b [u8],
        method: &Method,
        eof: bool,
        headers: &mut [httparse::Header<'b>],
    ) -> Result<(Self, usize), ResponseError> {
        let mut raw = httparse::Response::new(headers);

        let head_len = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let version = raw
            .version
            .ok_or(ResponseError::MissingField { field: "version" })?;
        let code = raw
            .code
            .ok_or(ResponseError::MissingField { field: "status" })?;
        let status = StatusCode::from_u16(code).ok_or(ResponseError::InvalidStatus(code))?;
        let reason = raw.reason.unwrap_or_default().to_owned();

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            header_map.insert(header.name, String::from_utf8_lossy(header.value));
        }

        let rest = &buf[head_len..];
        let (body, body_len) = if *method == Method::Head || status.forbids_body() {
            (Bytes::new(), 0)
        } else if header_map.is_chunked() {
            decode_chunked(rest)?.ok_or(ResponseError::Incomplete)?
        } else if let Some(expected) = header_map.content_length() {
            if rest.len() < expected {
                return Err(if eof {
                    ResponseError::Truncated {
                        expected,
                        actual: rest.len(),
                    }
                } else {
                    ResponseError::Incomplete
                });
            }
            (Bytes::copy_from_slice(&rest[..expected]), expected)
        } else if eof {
            (Bytes::copy_from_slice(rest), rest.len())
        } else {
            return Err(ResponseError::Incomplete);
        };

        let body = if body.is_empty() {
            Body::Empty
        } else {
            Body::Full(body)
        };

        Ok((
            Self {
                version,
                status,
                reason,
                headers: header_map,
                body,
            },
            head_len + body_len,
        ))
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

/// Decodes a chunked body. Returns the payload and the number of bytes
/// consumed, or `None` if the terminating chunk has not arrived yet.
/// Trailer fields are skipped.
fn decode_chunked(buf: &[u8]) -> Result<Option<(Bytes, usize)>, ResponseError> {
    let mut body = BytesMut::new();
    let mut pos = 0;

    loop {
        let (size_end, size) = match httparse::parse_chunk_size(&buf[pos..])? {
            httparse::Status::Complete(pair) => pair,
            httparse::Status::Partial => return Ok(None),
        };
        pos += size_end;

        if size == 0 {
            break;
        }

        let size = usize::try_from(size).map_err(|_| ResponseError::InvalidChunk)?;
        let chunk_end = pos.checked_add(size).ok_or(ResponseError::InvalidChunk)?;
        if buf.len() < chunk_end + 2 {
            return Ok(None);
        }
        if &buf[chunk_end..chunk_end + 2] != b"\r\n" {
            return Err(ResponseError::InvalidChunk);
        }
        body.put_slice(&buf[pos..chunk_end]);
        pos = chunk_end + 2;
    }

    // Trailer section: zero or more header lines, then an empty line.
    loop {
        let rest = &buf[pos..];
        match rest.windows(2).position(|w| w == b"\r\n") {
            Some(0) => return Ok(Some((body.freeze(), pos + 2))),
            Some(line_end) => pos += line_end + 2,
            None => return Ok(None),
        }
    }
}
