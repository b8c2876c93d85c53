//! Plain HTTP/1.1 over TCP, used as the default live transport.
//!
//! One connection per request: the request is written with
//! `Connection: close`, and the response is read until it is completely
//! framed or the peer closes the connection. No TLS, no pooling, no
//! redirects, no timeouts — wrap the connector (or bring your own
//! [`RoundTrip`]) for any of those.

use async_trait::async_trait;
use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::{BoxError, RoundTrip};
use crate::http::{Request, Response, ResponseError};

/// Errors produced by the connector.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unsupported URL scheme `{0}` (only http is supported)")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("response exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    #[error("invalid response: {0}")]
    Response(#[from] ResponseError),
}

/// Maximum size of a complete HTTP response we will buffer (8 MiB).
pub const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The default [`RoundTrip`]: one TCP connection per exchange.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    max_response_size: usize,
}

impl HttpConnector {
    pub fn new() -> Self {
        Self {
            max_response_size: MAX_RESPONSE_SIZE,
        }
    }

    /// Caps the number of bytes buffered for a single response.
    #[must_use]
    pub fn max_response_size(mut self, max_bytes: usize) -> Self {
        self.max_response_size = max_bytes;
        self
    }

    /// Sends `request` and reads the complete response.
    ///
    /// The request body is buffered in place first, so the caller can still
    /// read it afterwards. Interim `1xx` responses (other than `101`) are
    /// skipped.
    ///
    /// # Errors
    ///
    /// See [`ConnectError`].
    pub async fn send(&self, request: &mut Request) -> Result<Response, ConnectError> {
        let url = request.url();
        if url.scheme() != "http" {
            return Err(ConnectError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let host = url.host_str().ok_or(ConnectError::MissingHost)?;
        let port = url.port_or_known_default().unwrap_or(80);
        let addr = format!("{host}:{port}");

        let body = request.body_mut().buffer().await?;
        let wire = request.encode(&body);

        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ConnectError::Connect {
                addr: addr.clone(),
                source,
            })?;
        debug!(
            addr = %addr,
            method = %request.method(),
            target = %request.target(),
            "sending request"
        );
        stream.write_all(&wire).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

        loop {
            let bytes_read = stream.read_buf(&mut buf).await?;
            let eof = bytes_read == 0;

            if buf.len() > self.max_response_size {
                return Err(ConnectError::TooLarge {
                    max_bytes: self.max_response_size,
                });
            }

            // A buffer may hold an interim response followed by the final one.
            loop {
                let (response, used) = match Response::decode(&buf, request.method(), eof) {
                    Ok(pair) => pair,
                    Err(ResponseError::Incomplete) if !eof => break,
                    Err(e) => return Err(e.into()),
                };

                let status = response.status();
                if status.is_informational() && status.as_u16() != 101 {
                    trace!(status = status.as_u16(), "skipping interim response");
                    let _ = buf.split_to(used);
                    continue;
                }

                debug!(addr = %addr, status = status.as_u16(), bytes = used, "response received");
                return Ok(response);
            }
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoundTrip for HttpConnector {
    async fn round_trip(&self, request: &mut Request) -> Result<Response, BoxError> {
        Ok(self.send(request).await?)
    }
}
