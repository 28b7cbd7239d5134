//! In-memory LRU image cache implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, DecodedImage};

/// Budget used when physical memory cannot be detected (64 MiB).
pub const FALLBACK_CAPACITY_KIB: u64 = 64 * 1024;

/// Share of physical memory given to the cache.
const MEMORY_FRACTION: u64 = 8;

/// Returns the default budget: an eighth of physical memory, in KiB.
#[must_use]
pub fn default_capacity_kib() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    match sys.total_memory() {
        0 => FALLBACK_CAPACITY_KIB,
        total_bytes => total_bytes / 1024 / MEMORY_FRACTION,
    }
}

struct CacheState {
    entries: LruCache<CacheKey, Arc<DecodedImage>>,
    used_kib: u64,
}

/// In-memory LRU cache for decoded images, bounded by total pixel size.
/// Thread-safe; usable from synchronous code.
pub struct MemoryImageCache {
    state: Mutex<CacheState>,
    capacity_kib: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache holding at most `capacity_kib` KiB of pixels.
    #[must_use]
    pub fn new(capacity_kib: u64) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                used_kib: 0,
            }),
            capacity_kib,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(default_capacity_kib())
    }

    /// Gets an image and marks it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        let mut state = self.state.lock();
        if let Some(img) = state.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(img.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        self.state.lock().entries.peek(key).cloned()
    }

    /// Stores an image, evicting least recently used entries until it fits.
    ///
    /// An image larger than the whole budget is not cached.
    pub fn put(&self, key: CacheKey, image: Arc<DecodedImage>) {
        let cost = image.cost_kib();
        let mut state = self.state.lock();

        if let Some(previous) = state.entries.pop(&key) {
            state.used_kib -= previous.cost_kib();
        }

        if cost > self.capacity_kib {
            debug!(
                key = %key,
                cost_kib = cost,
                capacity_kib = self.capacity_kib,
                "Image exceeds memory cache budget"
            );
            return;
        }

        while state.used_kib + cost > self.capacity_kib {
            let Some((evicted_key, evicted)) = state.entries.pop_lru() else {
                break;
            };
            state.used_kib -= evicted.cost_kib();
            debug!(key = %evicted_key, "Evicted image from memory cache");
        }

        debug!(key = %key, cost_kib = cost, "Storing image in memory cache");
        state.entries.put(key, image);
        state.used_kib += cost;
    }

    /// Removes an image from the cache.
    pub fn evict(&self, key: &CacheKey) {
        let mut state = self.state.lock();
        if let Some(img) = state.entries.pop(key) {
            state.used_kib -= img.cost_kib();
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    /// Clears all images from the cache.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.used_kib = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns the number of cached images.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed cost of all entries in KiB.
    pub fn used_kib(&self) -> u64 {
        self.state.lock().used_kib
    }

    /// Returns the budget in KiB.
    #[must_use]
    pub const fn capacity_kib(&self) -> u64 {
        self.capacity_kib
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let (size, used_kib) = {
            let state = self.state.lock();
            (state.entries.len(), state.used_kib)
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size,
            used_kib,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Current summed cost in KiB.
    pub used_kib: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} KiB), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.used_kib, self.hit_rate, self.hits, self.misses
        )
    }
}
