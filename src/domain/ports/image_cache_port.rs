//! Port definition for the persistent image cache.

use bytes::Bytes;
use tokio::sync::watch;

use crate::domain::entities::CacheKey;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// I/O error during cache operation.
    #[error("IO error: {0}")]
    IoError(String),
}

/// Outcome of asking for exclusive write access to a key.
pub enum EditSlot {
    /// Write access was granted.
    Acquired(Box<dyn CacheEditor>),
    /// Another editor holds the key.
    Busy(EditWait),
}

impl std::fmt::Debug for EditSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acquired(_) => f.write_str("EditSlot::Acquired"),
            Self::Busy(_) => f.write_str("EditSlot::Busy"),
        }
    }
}

/// Resolves once the in-flight edit of a key has finished.
#[derive(Debug)]
pub struct EditWait(watch::Receiver<()>);

impl EditWait {
    /// Wraps a receiver whose sender lives as long as the edit.
    #[must_use]
    pub const fn new(rx: watch::Receiver<()>) -> Self {
        Self(rx)
    }

    /// Waits until the editor committed, aborted or was dropped.
    pub async fn finished(mut self) {
        while self.0.changed().await.is_ok() {}
    }
}

/// Exclusive writer for a single cache entry.
///
/// Nothing written is visible to readers until [`CacheEditor::commit`].
/// Dropping an editor without committing discards the data.
#[async_trait::async_trait]
pub trait CacheEditor: Send {
    /// Appends bytes to the pending entry.
    async fn write(&mut self, chunk: &[u8]) -> CacheResult<()>;

    /// Atomically publishes the written bytes.
    async fn commit(self: Box<Self>) -> CacheResult<()>;

    /// Discards the written bytes.
    async fn abort(self: Box<Self>);
}

/// Port for the persistent, size-bounded cache of encoded image bytes.
/// Implementations must be thread-safe.
#[async_trait::async_trait]
pub trait DiskCachePort: Send + Sync {
    /// Requests exclusive write access to `key`.
    async fn begin_write(&self, key: &CacheKey) -> CacheResult<EditSlot>;

    /// Reads a committed entry. Returns None on a miss.
    async fn read(&self, key: &CacheKey) -> CacheResult<Option<Bytes>>;

    /// Checks if a committed entry exists.
    async fn contains(&self, key: &CacheKey) -> bool;

    /// Removes an entry.
    async fn remove(&self, key: &CacheKey);

    /// Persists pending bookkeeping and enforces the size bound.
    async fn flush(&self) -> CacheResult<()>;

    /// Removes every entry.
    async fn clear(&self) -> CacheResult<()>;

    /// Returns the total size of committed entries in bytes.
    fn size(&self) -> u64;

    /// Returns the capacity in bytes.
    fn max_size(&self) -> u64;

    /// Returns the number of committed entries.
    fn len(&self) -> usize;

    /// Returns true if the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
