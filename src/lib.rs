//! # replay
//!
//! A transparent caching layer for outbound HTTP/1.1 requests.
//!
//! [`CachingTransport`] wraps any [`RoundTrip`] implementation. Each request
//! is mapped to a cache key; a stored response is replayed byte-for-byte when
//! one exists, otherwise the live exchange runs and, if every verifier
//! accepts it, its wire representation is stored for next time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use replay::cache::DiskCache;
//! use replay::transport::{CachingTransport, TransportOptions};
//! use replay::verify;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = DiskCache::new("/tmp/replay-cache", Some(Duration::from_secs(3600)))?;
//!     let client = CachingTransport::new(
//!         Arc::new(cache),
//!         TransportOptions::default().verify(verify::status_in_two_hundreds()),
//!     )
//!     .client();
//!
//!     let mut response = client.get("http://127.0.0.1:8080/ip").await?;
//!     println!("{} ({} bytes)", response.status(), response.bytes().await?.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod http;
pub mod transport;
pub mod verify;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{Cache, CacheKey, DiskCache, MemoryCache};
pub use client::Client;
pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use transport::{CachingTransport, Error, HttpConnector, RoundTrip, TransportOptions};
pub use verify::Verifier;
