//! In-memory backend.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::trace;

use super::{Cache, StoreError};

/// A [`Cache`] holding every entry in a `HashMap`.
///
/// One reader/writer lock guards the whole map: any number of `get` calls
/// proceed together, a `set` waits for them and excludes everything else.
/// Entries live until overwritten or until the cache is dropped.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        trace!(key, bytes = value.len(), "memory cache set");
        self.entries.write().await.insert(key.to_owned(), value);
        Ok(())
    }
}
