//! Disk-based image cache for persistence across sessions.
//!
//! Each entry is a single file `<key>.0` inside the cache directory. Writers
//! stream into a temporary file in the same directory which is renamed into
//! place on commit, so a reader sees either the previous committed entry or
//! the new one, never a partial write.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::ports::{
    CacheEditor, CacheError, CacheResult, DiskCachePort, EditSlot, EditWait,
};

/// Maximum disk cache size in bytes (50 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 50 * 1024 * 1024;

/// Default cache subdirectory.
pub const DEFAULT_NAMESPACE: &str = "bitmap";

const ENTRY_SUFFIX: &str = ".0";
const EDIT_PREFIX: &str = ".edit-";

struct DiskState {
    /// Committed entries and their sizes, least recently used first.
    index: LruCache<CacheKey, u64>,
    total_size: u64,
    /// One sender per key being written; dropping it wakes waiters.
    edits: HashMap<CacheKey, watch::Sender<()>>,
}

struct DiskInner {
    cache_dir: PathBuf,
    max_size: u64,
    state: Mutex<DiskState>,
}

impl DiskInner {
    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{key}{ENTRY_SUFFIX}"))
    }

    /// Drops least recently used entries from the index until the size bound
    /// holds. Returns the files to delete once the lock is released.
    fn trim_to_size(&self, state: &mut DiskState) -> Vec<PathBuf> {
        let mut victims = Vec::new();
        while state.total_size > self.max_size {
            let Some((key, size)) = state.index.pop_lru() else {
                break;
            };
            state.total_size -= size;
            debug!(key = %key, size, "Evicting old cache file");
            victims.push(self.entry_path(&key));
        }
        victims
    }

    async fn publish(&self, key: &CacheKey, temp: TempPath, size: u64) -> CacheResult<()> {
        let path = self.entry_path(key);
        let staged = temp
            .keep()
            .map_err(|e| CacheError::IoError(format!("Failed to keep cache file: {}", e.error)))?;

        if let Err(e) = fs::rename(&staged, &path).await {
            if let Err(cleanup) = fs::remove_file(&staged).await {
                warn!(path = %staged.display(), error = %cleanup, "Failed to remove staged file");
            }
            return Err(CacheError::IoError(format!("Failed to publish cache file: {e}")));
        }

        let victims = {
            let mut state = self.state.lock();
            if let Some(previous) = state.index.put(key.clone(), size) {
                state.total_size -= previous;
            }
            state.total_size += size;
            self.trim_to_size(&mut state)
        };
        debug!(key = %key, path = %path.display(), size, "Stored image in disk cache");

        remove_files(victims).await;
        Ok(())
    }

    fn finish_edit(&self, key: &CacheKey) {
        self.state.lock().edits.remove(key);
    }

    fn forget(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        if let Some(size) = state.index.pop(key) {
            state.total_size -= size;
        }
    }
}

/// Disk-based LRU cache that persists raw image bytes.
pub struct DiskImageCache {
    inner: Arc<DiskInner>,
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("cache_dir", &self.inner.cache_dir)
            .field("max_size", &self.inner.max_size)
            .finish_non_exhaustive()
    }
}

impl DiskImageCache {
    /// Opens (or creates) a disk cache in the specified directory.
    ///
    /// Existing entries are indexed by modification time, leftovers of
    /// interrupted writes are removed.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created or read.
    pub fn open(cache_dir: PathBuf, max_size: u64) -> CacheResult<Self> {
        std::fs::create_dir_all(&cache_dir)
            .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;

        let entries = std::fs::read_dir(&cache_dir)
            .map_err(|e| CacheError::IoError(format!("Failed to read cache dir: {e}")))?;

        let mut found: Vec<(CacheKey, SystemTime, u64)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if name.starts_with(EDIT_PREFIX) {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!(file = name, error = %e, "Failed to remove stale edit file");
                }
                continue;
            }

            if let Some(stem) = name.strip_suffix(ENTRY_SUFFIX)
                && let Ok(meta) = entry.metadata()
            {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((CacheKey::new(stem), modified, meta.len()));
            }
        }

        found.sort_by_key(|(_, modified, _)| *modified);

        let mut index = LruCache::unbounded();
        let mut total_size = 0u64;
        for (key, _, size) in found {
            total_size += size;
            index.put(key, size);
        }

        let inner = DiskInner {
            cache_dir,
            max_size,
            state: Mutex::new(DiskState {
                index,
                total_size,
                edits: HashMap::new(),
            }),
        };

        let victims = {
            let mut state = inner.state.lock();
            debug!(
                entries = state.index.len(),
                size = state.total_size,
                "Opened disk cache"
            );
            inner.trim_to_size(&mut state)
        };
        for path in victims {
            if let Err(e) = std::fs::remove_file(&path)
                && e.kind() != ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
            }
        }

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Opens a cache in the default location for `namespace`.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created.
    pub fn default_location(namespace: &str, max_size: u64) -> CacheResult<Self> {
        Self::open(default_cache_dir(namespace), max_size)
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }
}

#[async_trait::async_trait]
impl DiskCachePort for DiskImageCache {
    async fn begin_write(&self, key: &CacheKey) -> CacheResult<EditSlot> {
        {
            let mut state = self.inner.state.lock();
            if let Some(tx) = state.edits.get(key) {
                debug!(key = %key, "Disk cache edit already in flight");
                return Ok(EditSlot::Busy(EditWait::new(tx.subscribe())));
            }
            let (tx, _) = watch::channel(());
            state.edits.insert(key.clone(), tx);
        }

        // Built before the temp file so a failure below still releases the key.
        let mut editor = DiskEditor {
            inner: self.inner.clone(),
            key: key.clone(),
            file: None,
            temp: None,
            written: 0,
        };

        let (file, temp) = tempfile::Builder::new()
            .prefix(EDIT_PREFIX)
            .tempfile_in(&self.inner.cache_dir)
            .map_err(|e| CacheError::IoError(format!("Failed to create cache file: {e}")))?
            .into_parts();
        editor.file = Some(fs::File::from_std(file));
        editor.temp = Some(temp);

        Ok(EditSlot::Acquired(Box::new(editor)))
    }

    async fn read(&self, key: &CacheKey) -> CacheResult<Option<Bytes>> {
        let path = self.inner.entry_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                let indexed = self.inner.state.lock().index.get(key).is_some();
                if indexed {
                    touch(&path).await;
                }
                Ok(Some(Bytes::from(bytes)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                self.inner.forget(key);
                Ok(None)
            }
            Err(e) => Err(CacheError::IoError(format!("Failed to read cache file: {e}"))),
        }
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().index.contains(key)
    }

    async fn remove(&self, key: &CacheKey) {
        let path = self.inner.entry_path(key);
        self.inner.forget(key);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to evict from disk cache");
            }
        } else {
            debug!(key = %key, "Evicted from disk cache");
        }
    }

    async fn flush(&self) -> CacheResult<()> {
        let victims = {
            let mut state = self.inner.state.lock();
            self.inner.trim_to_size(&mut state)
        };
        remove_files(victims).await;

        #[cfg(unix)]
        {
            let dir = fs::File::open(&self.inner.cache_dir)
                .await
                .map_err(|e| CacheError::IoError(format!("Failed to open cache dir: {e}")))?;
            dir.sync_all()
                .await
                .map_err(|e| CacheError::IoError(format!("Failed to sync cache dir: {e}")))?;
        }

        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let keys: Vec<CacheKey> = {
            let mut state = self.inner.state.lock();
            let keys = state.index.iter().map(|(k, _)| k.clone()).collect();
            state.index.clear();
            state.total_size = 0;
            keys
        };

        for key in keys {
            let path = self.inner.entry_path(&key);
            if let Err(e) = fs::remove_file(&path).await
                && e.kind() != ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
        debug!("Cleared disk cache");
        Ok(())
    }

    fn size(&self) -> u64 {
        self.inner.state.lock().total_size
    }

    fn max_size(&self) -> u64 {
        self.inner.max_size
    }

    fn len(&self) -> usize {
        self.inner.state.lock().index.len()
    }
}

/// Writer for one pending entry.
struct DiskEditor {
    inner: Arc<DiskInner>,
    key: CacheKey,
    file: Option<fs::File>,
    temp: Option<TempPath>,
    written: u64,
}

#[async_trait::async_trait]
impl CacheEditor for DiskEditor {
    async fn write(&mut self, chunk: &[u8]) -> CacheResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CacheError::IoError("Editor already closed".to_string()))?;
        file.write_all(chunk)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to write cache file: {e}")))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CacheResult<()> {
        let mut this = self;
        let (Some(mut file), Some(temp)) = (this.file.take(), this.temp.take()) else {
            return Err(CacheError::IoError("Editor already closed".to_string()));
        };

        file.flush()
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to flush cache file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to sync cache file: {e}")))?;
        drop(file);

        this.inner.publish(&this.key, temp, this.written).await
    }

    async fn abort(self: Box<Self>) {
        let mut this = self;
        drop(this.file.take());
        if let Some(temp) = this.temp.take()
            && let Err(e) = temp.close()
        {
            warn!(key = %this.key, error = %e, "Failed to remove aborted cache file");
        }
        debug!(key = %this.key, "Aborted disk cache edit");
    }
}

impl Drop for DiskEditor {
    fn drop(&mut self) {
        self.inner.finish_edit(&self.key);
    }
}

/// Marks an entry as recently used so the order survives restarts.
async fn touch(path: &Path) {
    let result = match fs::OpenOptions::new().write(true).open(path).await {
        Ok(file) => file.into_std().await.set_modified(SystemTime::now()),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        trace!(path = %path.display(), error = %e, "Failed to touch cache file");
    }
}

async fn remove_files(paths: Vec<PathBuf>) {
    for path in paths {
        if let Err(e) = fs::remove_file(&path).await
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
        }
    }
}

/// Returns the default cache directory path for a namespace.
#[must_use]
pub fn default_cache_dir(namespace: &str) -> PathBuf {
    directories::ProjectDirs::from("com", "linuxmobile", "imgtier").map_or_else(
        || {
            std::env::temp_dir()
                .join("imgtier")
                .join("cache")
                .join(namespace)
        },
        |dirs| dirs.cache_dir().join(namespace),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_cache(max_size: u64) -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), max_size).unwrap();
        (cache, temp_dir)
    }

    async fn acquire(cache: &DiskImageCache, key: &CacheKey) -> Box<dyn CacheEditor> {
        match cache.begin_write(key).await.unwrap() {
            EditSlot::Acquired(editor) => editor,
            EditSlot::Busy(_) => panic!("expected to acquire editor for {key}"),
        }
    }

    async fn put_bytes(cache: &DiskImageCache, key: &str, data: &[u8]) {
        let mut editor = acquire(cache, &CacheKey::new(key)).await;
        editor.write(data).await.unwrap();
        editor.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_and_read_round_trip() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let key = CacheKey::new("test1");

        let mut editor = acquire(&cache, &key).await;
        editor.write(b"test image ").await.unwrap();
        editor.write(b"data").await.unwrap();
        editor.commit().await.unwrap();

        let retrieved = cache.read(&key).await.unwrap();
        assert_eq!(retrieved.as_deref(), Some(&b"test image data"[..]));
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let result = cache.read(&CacheKey::new("nonexistent")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_uncommitted_write_is_invisible() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let key = CacheKey::new("pending");

        let mut editor = acquire(&cache, &key).await;
        editor.write(b"partial").await.unwrap();

        assert!(cache.read(&key).await.unwrap().is_none());
        editor.commit().await.unwrap();
        assert!(cache.read(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_abort_leaves_no_entry() {
        let (cache, temp) = create_test_cache(1024 * 1024);
        let key = CacheKey::new("aborted");

        let mut editor = acquire(&cache, &key).await;
        editor.write(b"partial").await.unwrap();
        editor.abort().await;

        assert!(cache.read(&key).await.unwrap().is_none());
        assert!(cache.is_empty());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_editor_is_aborted() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let key = CacheKey::new("dropped");

        {
            let mut editor = acquire(&cache, &key).await;
            editor.write(b"partial").await.unwrap();
        }

        assert!(cache.read(&key).await.unwrap().is_none());
        // The key is writable again.
        let _editor = acquire(&cache, &key).await;
    }

    #[tokio::test]
    async fn test_abort_keeps_previous_entry() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        put_bytes(&cache, "k", b"first").await;

        let key = CacheKey::new("k");
        let mut editor = acquire(&cache, &key).await;
        editor.write(b"second").await.unwrap();
        editor.abort().await;

        assert_eq!(cache.read(&key).await.unwrap().as_deref(), Some(&b"first"[..]));
    }

    #[tokio::test]
    async fn test_second_writer_is_busy() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let key = CacheKey::new("contended");

        let editor = acquire(&cache, &key).await;
        let slot = cache.begin_write(&key).await.unwrap();
        assert!(matches!(slot, EditSlot::Busy(_)));

        editor.abort().await;
        let slot = cache.begin_write(&key).await.unwrap();
        assert!(matches!(slot, EditSlot::Acquired(_)));
    }

    #[tokio::test]
    async fn test_busy_wait_resolves_after_commit() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let cache = Arc::new(cache);
        let key = CacheKey::new("shared");

        let mut editor = acquire(&cache, &key).await;
        let EditSlot::Busy(wait) = cache.begin_write(&key).await.unwrap() else {
            panic!("expected busy slot");
        };

        let reader = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                wait.finished().await;
                cache.read(&key).await.unwrap()
            })
        };

        editor.write(b"payload").await.unwrap();
        editor.commit().await.unwrap();

        let seen = reader.await.unwrap();
        assert_eq!(seen.as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn test_remove() {
        let (cache, _temp) = create_test_cache(1024 * 1024);
        let key = CacheKey::new("test1");

        put_bytes(&cache, "test1", b"test").await;
        assert!(cache.contains(&key).await);

        cache.remove(&key).await;
        assert!(!cache.contains(&key).await);
        assert!(cache.read(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, _temp) = create_test_cache(1024 * 1024);

        put_bytes(&cache, "test1", b"data1").await;
        put_bytes(&cache, "test2", b"data2").await;
        assert_eq!(cache.len(), 2);

        cache.clear().await.unwrap();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size(), 0);
        assert!(cache.read(&CacheKey::new("test1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_size_counters_sync() {
        let (cache, _temp) = create_test_cache(1024 * 1024);

        assert_eq!(cache.size(), 0);
        assert_eq!(cache.len(), 0);

        put_bytes(&cache, "test1", b"hello").await;
        put_bytes(&cache, "test2", b"world!").await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size(), 11);

        put_bytes(&cache, "test1", b"hey").await;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size(), 9);

        cache.remove(&CacheKey::new("test2")).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 3);
    }

    #[tokio::test]
    async fn test_eviction_when_over_capacity() {
        let (cache, _temp) = create_test_cache(10);

        put_bytes(&cache, "test1", b"123456").await;
        put_bytes(&cache, "test2", b"123456").await;

        assert!(!cache.cache_dir().join("test1.0").exists());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 6);
        assert!(cache.read(&CacheKey::new("test1")).await.unwrap().is_none());
        assert!(cache.read(&CacheKey::new("test2")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_eviction_follows_access_order() {
        let (cache, _temp) = create_test_cache(12);

        put_bytes(&cache, "a", b"aaaa").await;
        put_bytes(&cache, "b", b"bbbb").await;
        put_bytes(&cache, "c", b"cccc").await;

        let _ = cache.read(&CacheKey::new("a")).await.unwrap();
        put_bytes(&cache, "d", b"dddd").await;

        assert!(cache.contains(&CacheKey::new("a")).await);
        assert!(!cache.contains(&CacheKey::new("b")).await);
        assert!(cache.contains(&CacheKey::new("c")).await);
        assert!(cache.contains(&CacheKey::new("d")).await);
        assert!(cache.size() <= cache.max_size());
    }

    #[tokio::test]
    async fn test_read_of_unindexed_entry_keeps_counters() {
        let (cache, _temp) = create_test_cache(1024);
        let key = CacheKey::new("evicted");
        put_bytes(&cache, "evicted", b"123456").await;

        // Index entry dropped by a concurrent trim before the file is removed.
        cache.inner.forget(&key);

        let bytes = cache.read(&key).await.unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"123456"[..]));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size(), 0);
        assert!(!cache.contains(&key).await);
    }

    #[tokio::test]
    async fn test_entry_larger_than_capacity_is_dropped() {
        let (cache, _temp) = create_test_cache(4);

        put_bytes(&cache, "big", b"123456").await;

        assert!(cache.is_empty());
        assert!(cache.read(&CacheKey::new("big")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();
            put_bytes(&cache, "persisted", b"bytes").await;
            cache.flush().await.unwrap();
        }

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 5);
        let bytes = cache.read(&CacheKey::new("persisted")).await.unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"bytes"[..]));
    }

    #[tokio::test]
    async fn test_open_removes_stale_edits() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join(".edit-leftover");
        std::fs::write(&stale, b"junk").unwrap();

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();
        assert!(!stale.exists());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_open_trims_to_new_capacity() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024).unwrap();
            put_bytes(&cache, "a", b"123456").await;
            put_bytes(&cache, "b", b"123456").await;
        }

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 8).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.size() <= 8);
    }
}
