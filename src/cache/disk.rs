//! On-disk backend with optional expiration and a bounded total size.
//!
//! Every entry is one file directly under the cache directory, named by the
//! hex SHA-256 of its key, so arbitrary keys map to fixed-length, filesystem
//! safe names.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, warn};

use super::key::sha256_hex;
use super::{Cache, StoreError};

/// Default size budget for a disk cache (100 MiB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE_BYTES
}

/// Settings for a [`DiskCache`].
///
/// Deserializable so it can sit inside an application's own config file.
///
/// ```
/// use std::time::Duration;
/// use replay::cache::DiskCacheConfig;
///
/// let config: DiskCacheConfig =
///     serde_json::from_str(r#"{ "path": "/var/cache/replay", "ttl_ms": 60000 }"#).unwrap();
/// assert_eq!(config.ttl(), Some(Duration::from_secs(60)));
/// assert_eq!(config.max_size_bytes, replay::cache::disk::DEFAULT_MAX_SIZE_BYTES);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DiskCacheConfig {
    /// Directory holding the entry files. Created if missing.
    pub path: PathBuf,
    /// Lifetime of each entry in milliseconds. Absent or zero: no expiration.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    /// Approximate upper bound on the summed size of all entries.
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,
}

impl DiskCacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ttl_ms: None,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }

    #[must_use]
    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    #[must_use]
    pub fn max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// The entry lifetime, or `None` when entries never expire.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }
}

/// A [`Cache`] storing each entry as a file.
///
/// With a TTL, every [`set`](Cache::set) spawns a Tokio task that deletes the
/// entry's file once the TTL has elapsed. `set` must therefore run inside a
/// Tokio runtime.
///
/// When the summed size of the entries exceeds the budget, the least
/// recently read or written entries are removed until it fits again. The
/// entry that was just written is never removed by its own write.
///
/// Cloning is cheap; clones share the same directory and index.
#[derive(Debug, Clone)]
pub struct DiskCache {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    ttl: Option<Duration>,
    max_size: u64,
    index: Mutex<Index>,
    tmp_seq: AtomicU64,
}

/// Sizes and recency of the files in the cache directory.
#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, Slot>,
    total: u64,
    clock: u64,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    size: u64,
    last_used: u64,
}

impl Index {
    fn record(&mut self, name: &str, size: u64) {
        self.clock += 1;
        let slot = Slot {
            size,
            last_used: self.clock,
        };
        if let Some(old) = self.entries.insert(name.to_owned(), slot) {
            self.total -= old.size;
        }
        self.total += size;
    }

    fn touch(&mut self, name: &str, size: u64) {
        match self.entries.get_mut(name) {
            Some(slot) => {
                self.clock += 1;
                slot.last_used = self.clock;
            }
            None => self.record(name, size),
        }
    }

    fn forget(&mut self, name: &str) {
        if let Some(old) = self.entries.remove(name) {
            self.total -= old.size;
        }
    }

    /// Removes least recently used entries other than `keep` until the total
    /// fits in `max`, returning the removed names.
    fn evict(&mut self, max: u64, keep: &str) -> Vec<String> {
        if self.total <= max {
            return Vec::new();
        }

        let mut candidates: Vec<(String, Slot)> = self
            .entries
            .iter()
            .filter(|(name, _)| name.as_str() != keep)
            .map(|(name, slot)| (name.clone(), *slot))
            .collect();
        candidates.sort_by_key(|(_, slot)| slot.last_used);

        let mut victims = Vec::new();
        for (name, _) in candidates {
            if self.total <= max {
                break;
            }
            self.forget(&name);
            victims.push(name);
        }
        victims
    }
}

impl DiskCache {
    /// Opens a cache in `path` with the default size budget.
    ///
    /// `ttl` of `None` (or zero) keeps entries until they are overwritten or
    /// removed from outside.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or listed.
    pub fn new(path: impl Into<PathBuf>, ttl: Option<Duration>) -> io::Result<Self> {
        let mut config = DiskCacheConfig::new(path);
        config.ttl_ms = ttl.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Self::with_config(config)
    }

    /// Opens a cache from a full configuration.
    ///
    /// Entry files already present in the directory are counted against the
    /// size budget, oldest modification first in eviction order. Files whose
    /// names are not entry digests are left alone.
    pub fn with_config(config: DiskCacheConfig) -> io::Result<Self> {
        std::fs::create_dir_all(&config.path)?;
        let index = scan(&config.path)?;
        debug!(
            path = %config.path.display(),
            entries = index.entries.len(),
            bytes = index.total,
            "opened disk cache"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                ttl: config.ttl(),
                max_size: config.max_size_bytes,
                root: config.path,
                index: Mutex::new(index),
                tmp_seq: AtomicU64::new(0),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.root
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.inner.ttl
    }

    /// Summed size in bytes of the entries this cache knows about.
    pub fn size(&self) -> u64 {
        self.inner.index().total
    }

    /// The file that holds the entry for `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.inner.root.join(sha256_hex(key.as_bytes()))
    }
}

impl Inner {
    fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn erase(&self, name: &str) -> io::Result<()> {
        self.index().forget(name);
        match tokio::fs::remove_file(self.root.join(name)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let name = sha256_hex(key.as_bytes());
        match tokio::fs::read(self.inner.root.join(&name)).await {
            Ok(data) => {
                self.inner.index().touch(&name, data.len() as u64);
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.inner.index().forget(&name);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the entry and, with a TTL, schedules its deletion.
    ///
    /// The deletion is tied to the file name, not to this particular write:
    /// writing the same key again before the TTL elapses does not cancel the
    /// earlier timer, which will delete the newer entry when it fires.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        let name = sha256_hex(key.as_bytes());
        let seq = self.inner.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.inner.root.join(format!(".tmp-{seq}-{name}"));

        tokio::fs::write(&tmp, &value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.inner.root.join(&name)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let victims = {
            let mut index = self.inner.index();
            index.record(&name, value.len() as u64);
            index.evict(self.inner.max_size, &name)
        };
        for victim in victims {
            debug!(entry = %victim, "evicting disk cache entry over size budget");
            if let Err(e) = tokio::fs::remove_file(self.inner.root.join(&victim)).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(entry = %victim, error = %e, "failed to evict disk cache entry");
                }
            }
        }

        if let Some(ttl) = self.inner.ttl {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                match inner.erase(&name).await {
                    Ok(()) => debug!(entry = %name, "expired disk cache entry"),
                    Err(e) => warn!(entry = %name, error = %e, "failed to expire disk cache entry"),
                }
            });
        }

        Ok(())
    }
}

/// Whether `name` looks like an entry file: a lowercase hex SHA-256 digest.
fn is_entry_name(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Builds the index from the entry files already in `root`. Other files,
/// including leftover temporaries, are never indexed and so never evicted.
fn scan(root: &Path) -> io::Result<Index> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let meta = entry.metadata()?;
        if !meta.is_file() || !is_entry_name(&name) {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, name, meta.len()));
    }
    found.sort();

    let mut index = Index::default();
    for (_, name, size) in found {
        index.record(&name, size);
    }
    Ok(index)
}
