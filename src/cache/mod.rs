//! Storage backends for serialized responses.
//!
//! A backend is anything implementing [`Cache`]: a byte-blob store with a
//! `get` and a `set`. Two implementations ship with the crate:
//!
//! - [`MemoryCache`] — a map behind a whole-map reader/writer lock.
//! - [`DiskCache`] — one file per entry, with an optional time-to-live and a
//!   bounded total size.
//!
//! Keys are derived from requests by [`CacheKey::derive`].

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod disk;
pub mod key;
pub mod memory;

pub use disk::{DiskCache, DiskCacheConfig};
pub use key::CacheKey;
pub use memory::MemoryCache;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Backend(String),
}

/// A byte-blob key-value store.
///
/// A missing key is `Ok(None)`, never an error. `set` overwrites whatever was
/// stored under the key before. Implementations must be safe to share across
/// tasks.
///
/// # Examples
///
/// ```
/// use replay::cache::{Cache, MemoryCache};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), replay::cache::StoreError> {
/// let cache = MemoryCache::new();
/// cache.set("GET http://x/1", "response-a".into()).await?;
///
/// assert_eq!(cache.get("GET http://x/1").await?.as_deref(), Some(&b"response-a"[..]));
/// assert!(cache.get("GET http://x/2").await?.is_none());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the bytes stored under `key`, or `None` if there are none.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError>;
}
