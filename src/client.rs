//! A small client facade over a [`CachingTransport`].

use std::sync::Arc;

use crate::http::{Body, Request, Response};
use crate::transport::{CachingTransport, Error};

/// Request shorthands on top of a shared [`CachingTransport`].
///
/// Cloning is cheap; clones share the transport and its cache.
///
/// ```no_run
/// use std::sync::Arc;
/// use replay::cache::MemoryCache;
/// use replay::transport::{CachingTransport, TransportOptions};
/// use replay::verify;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), replay::transport::Error> {
/// let client = CachingTransport::new(
///     Arc::new(MemoryCache::new()),
///     TransportOptions::default().verify(verify::status_in_two_hundreds()),
/// )
/// .client();
///
/// let mut response = client.get("http://127.0.0.1:8080/ip").await?;
/// println!("{}", response.status());
/// # let _ = response.bytes().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<CachingTransport>,
}

impl Client {
    pub fn new(transport: Arc<CachingTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<CachingTransport> {
        &self.transport
    }

    /// Sends a `GET` request.
    pub async fn get(&self, url: &str) -> Result<Response, Error> {
        self.send(Request::get(url)?).await
    }

    /// Sends a `POST` request with `body`.
    pub async fn post(&self, url: &str, body: impl Into<Body>) -> Result<Response, Error> {
        self.send(Request::post(url, body)?).await
    }

    /// Sends an arbitrary request.
    pub async fn send(&self, mut request: Request) -> Result<Response, Error> {
        self.transport.exchange(&mut request).await
    }
}
