//! Outbound HTTP/1.1 requests.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use url::Url;

use super::{Body, Headers, Method};

/// Errors that can occur while building or parsing a request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// An HTTP request addressed to an absolute URL.
///
/// The URL is stored in its normalized form (lowercase scheme and host,
/// default port elided, empty path replaced by `/`), which is what the cache
/// key is derived from.
///
/// # Examples
///
/// ```
/// use replay::http::{Method, Request};
///
/// let request = Request::new(Method::Post, "HTTP://Example.COM:80/search?q=rust")
///     .unwrap()
///     .header("Accept", "application/json")
///     .body("payload");
///
/// assert_eq!(request.url().as_str(), "http://example.com/search?q=rust");
/// assert_eq!(request.headers().get("accept"), Some("application/json"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Body,
}

impl Request {
    /// Maximum number of headers accepted by [`Request::parse`].
    #[cfg(test)]
    const MAX_HEADERS: usize = 64;

    /// Creates a request with no headers and no body.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Url`] if `url` is not an absolute URL.
    pub fn new(method: Method, url: &str) -> Result<Self, RequestError> {
        Ok(Self::from_url(method, Url::parse(url)?))
    }

    pub fn from_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    /// Shorthand for `Request::new(Method::Get, url)`.
    pub fn get(url: &str) -> Result<Self, RequestError> {
        Self::new(Method::Get, url)
    }

    /// Shorthand for `Request::new(Method::Post, url)` with a body.
    pub fn post(url: &str, body: impl Into<Body>) -> Result<Self, RequestError> {
        Ok(Self::new(Method::Post, url)?.body(body))
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
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

    /// Returns the origin-form request target: path plus `?query` if any.
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_owned(),
        }
    }

    /// Returns the value for the `Host` header: host, plus port when it is
    /// not the scheme default.
    pub fn host_header(&self) -> Option<String> {
        let host = self.url.host_str()?;
        Some(match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        })
    }

    /// Serializes the request head for transmission, followed by `body`.
    ///
    /// Writes `Host` unless the caller set one, `Content-Length` when a body
    /// is present and the caller did not frame it, and `Connection: close`.
    pub fn encode(&self, body: &Bytes) -> BytesMut {
        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + body.len());

        buf.put(format!("{} {} HTTP/1.1\r\n", self.method, self.target()).as_bytes());

        if !self.headers.contains("host") {
            if let Some(host) = self.host_header() {
                buf.put(format!("Host: {host}\r\n").as_bytes());
            }
        }
        self.headers.write_to(&mut buf);

        let framed = self.headers.contains("content-length") || self.headers.is_chunked();
        if !self.body.is_absent() && !framed {
            buf.put(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        if !self.headers.contains("connection") {
            buf.put(&b"Connection: close\r\n"[..]);
        }

        buf.put(&b"\r\n"[..]);
        buf.put_slice(body);
        buf
    }

    /// Parses an origin-form HTTP/1.1 request, resolving the target against
    /// its `Host` header. Only the in-crate test servers read requests.
    ///
    /// Returns the request and the byte offset where the body begins. Any
    /// bytes after that offset, up to `Content-Length`, become the body.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — the head is not fully buffered yet.
    /// - [`RequestError::Parse`] — the head is malformed.
    /// - [`RequestError::MissingField`] — no method, path or `Host` header.
    #[cfg(test)]
    pub(crate) fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(m) => m.parse().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };
        let path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let host = header_map
            .get("host")
            .ok_or(RequestError::MissingField { field: "host" })?;
        let url = Url::parse(&format!("http://{host}{path}"))?;

        let rest = &buf[body_offset..];
        let len = header_map.content_length().unwrap_or(0).min(rest.len());
        let body = if len == 0 {
            Body::Empty
        } else {
            Body::Full(Bytes::copy_from_slice(&rest[..len]))
        };

        Ok((
            Self {
                method,
                url,
                headers: header_map,
                body,
            },
            body_offset,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_normalized() {
        let req = Request::get("HTTP://LOCALHOST:80").unwrap();
        assert_eq!(req.url().as_str(), "http://localhost/");
        assert_eq!(req.target(), "/");
        assert_eq!(req.host_header().as_deref(), Some("localhost"));
    }

    #[test]
    fn relative_url_is_rejected() {
        assert!(matches!(Request::get("/just/a/path"), Err(RequestError::Url(_))));
    }

    #[test]
    fn encode_get_without_body() {
        let req = Request::get("http://example.com:8080/a?b=c")
            .unwrap()
            .header("Accept", "*/*");
        let wire = req.encode(&Bytes::new());
        assert_eq!(
            &wire[..],
            &b"GET /a?b=c HTTP/1.1\r\nHost: example.com:8080\r\nAccept: */*\r\nConnection: close\r\n\r\n"[..]
        );
    }

    #[test]
    fn encode_post_adds_content_length() {
        let req = Request::post("http://example.com/submit", "hello").unwrap();
        let body = Bytes::from_static(b"hello");
        let text = String::from_utf8(req.encode(&body).to_vec()).unwrap();
        assert!(text.starts_with("POST /submit HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn parse_resolves_host() {
        let raw = b"POST /submit?x=1 HTTP/1.1\r\nHost: localhost:9000\r\nContent-Length: 5\r\n\r\nhello";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Post);
        assert_eq!(req.url().as_str(), "http://localhost:9000/submit?x=1");
        assert_eq!(&raw[offset..], b"hello");
        assert_eq!(req.body_ref().as_bytes().map(|b| &b[..]), Some(&b"hello"[..]));
    }

    #[test]
    fn parse_incomplete() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn parse_requires_host() {
        let raw = b"GET / HTTP/1.1\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::MissingField { field: "host" })
        ));
    }
}
