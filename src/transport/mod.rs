//! The cache-augmented transport.
//!
//! [`CachingTransport`] sits in front of any [`RoundTrip`] implementation.
//! For every request it derives a [`CacheKey`], replays a stored response on
//! a hit, and on a miss performs the live exchange, runs the verifier chain,
//! and stores the serialized response.
//!
//! ```text
//! request ─▶ key ─▶ cache.get ─┬─ hit ──▶ parse ──────────────────────────▶ response
//!                              └─ miss ─▶ inner ─▶ verify ─┬─ accept ─▶ dump ─▶ cache.set ─▶ response
//!                                                          └─ reject ─────────────────────▶ response
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheKey, StoreError};
use crate::client::Client;
use crate::http::request::RequestError;
use crate::http::{Request, Response, ResponseError};
use crate::verify::{self, Verifier};

pub mod connector;

pub use connector::{ConnectError, HttpConnector};

/// Boxed error returned by [`RoundTrip`] implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A single request/response exchange.
///
/// The request is borrowed mutably so an implementation can buffer its body
/// in place; it must leave the body replayable for the caller.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    async fn round_trip(&self, request: &mut Request) -> Result<Response, BoxError>;
}

/// Errors returned by [`CachingTransport::exchange`].
#[derive(Debug, Error)]
pub enum Error {
    /// The request body could not be read while deriving the cache key.
    #[error("could not read request body: {0}")]
    Key(#[source] io::Error),

    /// A stored entry could not be parsed back into a response.
    #[error("cached response for `{key}` is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: ResponseError,
    },

    /// The underlying transport failed; nothing was cached.
    #[error(transparent)]
    Transport(BoxError),

    /// The backend failed to read or store an entry.
    #[error("cache storage failed: {0}")]
    Storage(#[from] StoreError),

    /// The live response could not be serialized: its body failed to read,
    /// or its framing does not match the body it carries.
    #[error("could not serialize response: {0}")]
    Dump(#[source] ResponseError),

    #[error("invalid request: {0}")]
    Request(#[from] RequestError),
}

/// Construction options for a [`CachingTransport`].
///
/// The default sends live requests with a fresh [`HttpConnector`] and caches
/// every response.
///
/// ```
/// use replay::http::Method;
/// use replay::transport::TransportOptions;
/// use replay::verify;
///
/// let options = TransportOptions::default()
///     .verify(verify::status_in_two_hundreds())
///     .verify(verify::request_method(Method::Get));
/// assert_eq!(options.verifiers.len(), 2);
/// ```
#[derive(Clone)]
pub struct TransportOptions {
    /// Performs the live exchange on a miss.
    pub transport: Arc<dyn RoundTrip>,
    /// Must all accept a live response before it is stored.
    pub verifiers: Vec<Verifier>,
}

impl TransportOptions {
    /// Replaces the live transport.
    #[must_use]
    pub fn with_transport(mut self, transport: impl RoundTrip + 'static) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Appends a verifier to the chain.
    #[must_use]
    pub fn verify(mut self, verifier: Verifier) -> Self {
        self.verifiers.push(verifier);
        self
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            transport: Arc::new(HttpConnector::new()),
            verifiers: Vec::new(),
        }
    }
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("verifiers", &self.verifiers.len())
            .finish_non_exhaustive()
    }
}

/// A [`RoundTrip`] that answers from a [`Cache`] when it can.
///
/// The transport itself holds no mutable state and can be shared freely
/// (wrap it in an [`Arc`]); concurrency guarantees come from the backend.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use replay::cache::MemoryCache;
/// use replay::http::Request;
/// use replay::transport::{CachingTransport, TransportOptions};
/// use replay::verify;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = CachingTransport::new(
///     Arc::new(MemoryCache::new()),
///     TransportOptions::default().verify(verify::status_in_two_hundreds()),
/// );
///
/// let mut request = Request::get("http://127.0.0.1:8080/ip")?;
/// let first = transport.exchange(&mut request).await?; // live
/// let second = transport.exchange(&mut request).await?; // replayed
/// assert_eq!(first.status(), second.status());
/// # Ok(())
/// # }
/// ```
pub struct CachingTransport {
    cache: Arc<dyn Cache>,
    transport: Arc<dyn RoundTrip>,
    verifiers: Vec<Verifier>,
}

impl CachingTransport {
    pub fn new(cache: Arc<dyn Cache>, options: TransportOptions) -> Self {
        Self {
            cache,
            transport: options.transport,
            verifiers: options.verifiers,
        }
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Wraps the transport in a [`Client`] with request shorthands.
    pub fn client(self) -> Client {
        Client::new(Arc::new(self))
    }

    /// Performs one exchange, through the cache.
    ///
    /// # Errors
    ///
    /// - [`Error::Key`] — the request body could not be buffered; nothing was sent.
    /// - [`Error::Corrupt`] — a stored entry failed to parse; no live request
    ///   is attempted in its place.
    /// - [`Error::Transport`] — the live exchange failed.
    /// - [`Error::Storage`] — the backend failed to read or write. A live
    ///   response obtained before a failed write is dropped.
    /// - [`Error::Dump`] — the live response body could not be read, or its
    ///   `Content-Length` disagrees with the body; nothing was stored.
    pub async fn exchange(&self, request: &mut Request) -> Result<Response, Error> {
        let key = CacheKey::derive(request).await.map_err(Error::Key)?;

        if let Some(dump) = self.cache.get(key.as_str()).await? {
            debug!(key = %key, bytes = dump.len(), "cache hit");
            return Response::parse(&dump, request.method()).map_err(|source| {
                warn!(key = %key, error = %source, "cached response failed to parse");
                Error::Corrupt {
                    key: key.into_string(),
                    source,
                }
            });
        }

        debug!(key = %key, "cache miss");
        let mut response = self
            .transport
            .round_trip(request)
            .await
            .map_err(Error::Transport)?;

        if !verify::accepts(&self.verifiers, request, &response) {
            debug!(
                key = %key,
                status = response.status().as_u16(),
                "response rejected by verifier, not caching"
            );
            return Ok(response);
        }

        let dump = response
            .dump(request.method())
            .await
            .map_err(Error::Dump)?;
        debug!(
            key = %key,
            status = response.status().as_u16(),
            bytes = dump.len(),
            "storing response"
        );
        self.cache.set(key.as_str(), dump).await?;

        Ok(response)
    }
}

impl fmt::Debug for CachingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingTransport")
            .field("verifiers", &self.verifiers.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RoundTrip for CachingTransport {
    async fn round_trip(&self, request: &mut Request) -> Result<Response, BoxError> {
        self.exchange(request).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use bytes::Bytes;
    use tokio::io::{AsyncRead, ReadBuf};

    use crate::cache::{DiskCache, MemoryCache};
    use crate::http::{Body, Method, StatusCode};

    use super::*;

    /// Answers every request with a numbered response and records what it saw.
    #[derive(Default)]
    struct Origin {
        calls: AtomicUsize,
        status: Option<StatusCode>,
        bodies: Mutex<Vec<Bytes>>,
    }

    impl Origin {
        fn with_status(status: StatusCode) -> Self {
            Self {
                status: Some(status),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RoundTrip for Origin {
        async fn round_trip(&self, request: &mut Request) -> Result<Response, BoxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let body = request.body_mut().buffer().await?;
            self.bodies.lock().unwrap().push(body);
            Ok(Response::new(self.status.unwrap_or(StatusCode::OK))
                .header("X-Served-By", "origin")
                .header("set-cookie", "a=1")
                .body(format!("response #{n}")))
        }
    }

    /// Answers every request with a fresh copy of one fixed response.
    struct Fixed(fn() -> Response);

    #[async_trait]
    impl RoundTrip for Fixed {
        async fn round_trip(&self, _request: &mut Request) -> Result<Response, BoxError> {
            Ok((self.0)())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl RoundTrip for Unreachable {
        async fn round_trip(&self, _request: &mut Request) -> Result<Response, BoxError> {
            Err("connection refused".into())
        }
    }

    struct ReadOnly;

    #[async_trait]
    impl Cache for ReadOnly {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Bytes) -> Result<(), StoreError> {
            Err(StoreError::Backend("read-only".into()))
        }
    }

    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("disk on fire")))
        }
    }

    fn setup(origin: Origin, verifiers: Vec<Verifier>) -> (CachingTransport, Arc<MemoryCache>, Arc<Origin>) {
        let cache = Arc::new(MemoryCache::new());
        let origin = Arc::new(origin);
        let options = TransportOptions {
            transport: origin.clone(),
            verifiers,
        };
        (CachingTransport::new(cache.clone(), options), cache, origin)
    }

    async fn key_of(request: &mut Request) -> String {
        CacheKey::derive(request).await.unwrap().into_string()
    }

    #[tokio::test]
    async fn second_exchange_replays_identically() {
        let (transport, _cache, origin) = setup(Origin::default(), Vec::new());
        let mut request = Request::get("http://x/1").unwrap();

        let mut live = transport.exchange(&mut request).await.unwrap();
        let mut replayed = transport.exchange(&mut request).await.unwrap();

        assert_eq!(origin.calls(), 1);
        assert_eq!(replayed.status(), live.status());
        assert_eq!(replayed.headers(), live.headers());
        assert_eq!(replayed.bytes().await.unwrap(), live.bytes().await.unwrap());
        assert_eq!(replayed.dump(&Method::Get).await.unwrap(),
            live.dump(&Method::Get).await.unwrap());
    }

    #[tokio::test]
    async fn stored_entry_matches_returned_response() {
        let (transport, cache, _origin) = setup(Origin::default(), Vec::new());
        let mut request = Request::get("http://x/item").unwrap();

        let mut live = transport.exchange(&mut request).await.unwrap();
        let stored = cache.get(&key_of(&mut request).await).await.unwrap().unwrap();
        let restored = Response::parse(&stored, &Method::Get).unwrap();

        assert_eq!(restored.status(), live.status());
        assert_eq!(restored.reason_phrase(), "OK");
        assert_eq!(restored.headers(), live.headers());
        assert_eq!(
            restored.body_ref().as_bytes(),
            Some(&live.bytes().await.unwrap())
        );
    }

    #[tokio::test]
    async fn rejected_response_is_returned_but_not_stored() {
        let (transport, cache, origin) = setup(
            Origin::with_status(StatusCode::SERVICE_UNAVAILABLE),
            vec![verify::status_in_two_hundreds()],
        );
        let mut request = Request::get("http://x/flaky").unwrap();

        let mut first = transport.exchange(&mut request).await.unwrap();
        assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&first.bytes().await.unwrap()[..], b"response #1");

        assert!(cache.get(&key_of(&mut request).await).await.unwrap().is_none());
        assert!(cache.is_empty().await);

        transport.exchange(&mut request).await.unwrap();
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn all_verifiers_must_accept() {
        let (transport, cache, _origin) = setup(
            Origin::default(),
            vec![
                verify::status_in_two_hundreds(),
                verify::request_method(Method::Get),
            ],
        );

        let mut post = Request::post("http://x/form", "a").unwrap();
        transport.exchange(&mut post).await.unwrap();
        assert!(cache.is_empty().await);

        let mut get = Request::get("http://x/form").unwrap();
        transport.exchange(&mut get).await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn post_bodies_are_cached_independently() {
        let (transport, cache, origin) = setup(Origin::default(), Vec::new());

        let mut a = Request::post("http://x/search", "a").unwrap();
        let mut b = Request::post("http://x/search", "b").unwrap();
        assert_ne!(key_of(&mut a).await, key_of(&mut b).await);

        let mut ra = transport.exchange(&mut a).await.unwrap();
        let mut rb = transport.exchange(&mut b).await.unwrap();
        assert_eq!(&ra.bytes().await.unwrap()[..], b"response #1");
        assert_eq!(&rb.bytes().await.unwrap()[..], b"response #2");
        assert_eq!(cache.len().await, 2);

        // The origin received the full bodies even though they were hashed first.
        let seen = origin.bodies.lock().unwrap().clone();
        assert_eq!(seen, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);

        let mut again = Request::post("http://x/search", "a").unwrap();
        let mut replayed = transport.exchange(&mut again).await.unwrap();
        assert_eq!(&replayed.bytes().await.unwrap()[..], b"response #1");
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn corrupt_entry_fails_without_live_call() {
        let (transport, cache, origin) = setup(Origin::default(), Vec::new());
        let mut request = Request::get("http://x/bad").unwrap();
        cache
            .set(&key_of(&mut request).await, Bytes::from_static(b"garbage"))
            .await
            .unwrap();

        let err = transport.exchange(&mut request).await.unwrap_err();
        assert!(matches!(err, Error::Corrupt { ref key, .. } if key == "GET http://x/bad"));
        assert_eq!(origin.calls(), 0);
    }

    #[tokio::test]
    async fn transport_error_is_propagated_and_not_cached() {
        let cache = Arc::new(MemoryCache::new());
        let transport = CachingTransport::new(
            cache.clone(),
            TransportOptions::default().with_transport(Unreachable),
        );
        let mut request = Request::get("http://x/down").unwrap();

        let err = transport.exchange(&mut request).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(err.to_string(), "connection refused");
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn response_with_many_headers_replays() {
        let cache = Arc::new(MemoryCache::new());
        let transport = CachingTransport::new(
            cache.clone(),
            TransportOptions::default().with_transport(Fixed(|| {
                (0..70)
                    .fold(Response::new(StatusCode::OK), |r, i| {
                        r.header(format!("X-H{i}"), i.to_string())
                    })
                    .body("many")
            })),
        );
        let mut request = Request::get("http://x/h").unwrap();

        let live = transport.exchange(&mut request).await.unwrap();
        for _ in 0..2 {
            let mut replayed = transport.exchange(&mut request).await.unwrap();
            assert_eq!(replayed.headers().len(), 71);
            assert_eq!(replayed.headers(), live.headers());
            assert_eq!(&replayed.bytes().await.unwrap()[..], b"many");
        }
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn mismatched_content_length_is_not_stored() {
        let cache = Arc::new(MemoryCache::new());
        let transport = CachingTransport::new(
            cache.clone(),
            TransportOptions::default().with_transport(Fixed(|| {
                Response::new(StatusCode::OK)
                    .header("Content-Length", "2")
                    .with_body(Body::from("abcdef"))
            })),
        );
        let mut request = Request::get("http://x/short").unwrap();

        let err = transport.exchange(&mut request).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Dump(ResponseError::LengthMismatch {
                declared: 2,
                actual: 6
            })
        ));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn storage_failure_is_surfaced() {
        let transport = CachingTransport::new(
            Arc::new(ReadOnly),
            TransportOptions::default().with_transport(Origin::default()),
        );
        let mut request = Request::get("http://x/1").unwrap();

        let err = transport.exchange(&mut request).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn unreadable_body_fails_before_sending() {
        let (transport, _cache, origin) = setup(Origin::default(), Vec::new());
        let mut request = Request::new(Method::Post, "http://x/upload")
            .unwrap()
            .body(Body::from_reader(Broken));

        let err = transport.exchange(&mut request).await.unwrap_err();
        assert!(matches!(err, Error::Key(_)));
        assert_eq!(origin.calls(), 0);
    }

    #[tokio::test]
    async fn works_over_disk_backend() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(Origin::default());
        let transport = CachingTransport::new(
            Arc::new(DiskCache::new(dir.path(), None).unwrap()),
            TransportOptions {
                transport: origin.clone(),
                verifiers: Vec::new(),
            },
        );

        let mut request = Request::get("http://x/disk").unwrap();
        let mut live = transport.exchange(&mut request).await.unwrap();
        let mut replayed = transport.exchange(&mut request).await.unwrap();

        assert_eq!(origin.calls(), 1);
        assert_eq!(replayed.dump(&Method::Get).await.unwrap(),
            live.dump(&Method::Get).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_exchanges_share_one_entry() {
        let (transport, cache, _origin) = setup(Origin::default(), Vec::new());
        let transport = Arc::new(transport);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move {
                    let mut request = Request::get("http://x/shared").unwrap();
                    transport.exchange(&mut request).await.map(|r| r.status())
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), StatusCode::OK);
        }
        assert_eq!(cache.len().await, 1);
    }
}
