//! Image loader facade.
//!
//! Wires the caches, the HTTP fetcher and the worker pool together from a
//! single configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::entities::{ExecutionContext, FetchRequest, LoadOutcome};
use crate::domain::ports::{DiskCachePort, ImageFetchPort};

use super::dispatcher::{DeliveryQueue, PoolConfig, TaskDispatcher};
use super::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DEFAULT_NAMESPACE, DiskImageCache};
use super::http_fetcher::HttpImageFetcher;
use super::memory_cache::{CacheStats, MemoryImageCache, default_capacity_kib};
use super::pipeline::FetchPipeline;

/// Errors raised while building the loader.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The worker pool could not be started.
    #[error("Failed to start worker pool: {0}")]
    Runtime(#[from] std::io::Error),

    /// The HTTP client could not be built.
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Configuration for the image loader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImageLoaderConfig {
    /// Memory cache capacity in KiB. Defaults to an eighth of physical memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_cache_kib: Option<u64>,
    /// Maximum disk cache size in bytes.
    pub disk_cache_size: u64,
    /// Parent directory of the disk cache. Defaults to the platform cache dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_cache_dir: Option<PathBuf>,
    /// Subdirectory the disk cache lives in.
    pub cache_namespace: String,
    /// Maximum concurrent downloads.
    pub max_concurrent_downloads: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Worker pool sizing.
    pub pool: PoolConfig,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            memory_cache_kib: None,
            disk_cache_size: DEFAULT_MAX_CACHE_SIZE,
            disk_cache_dir: None,
            cache_namespace: DEFAULT_NAMESPACE.to_string(),
            max_concurrent_downloads: 4,
            timeout_secs: 30,
            pool: PoolConfig::default(),
        }
    }
}

impl ImageLoaderConfig {
    fn open_disk_cache(&self) -> Option<Arc<dyn DiskCachePort>> {
        let opened = match &self.disk_cache_dir {
            Some(dir) => {
                DiskImageCache::open(dir.join(&self.cache_namespace), self.disk_cache_size)
            }
            None => DiskImageCache::default_location(&self.cache_namespace, self.disk_cache_size),
        };

        match opened {
            Ok(cache) => {
                info!(dir = %cache.cache_dir().display(), "Disk cache ready");
                Some(Arc::new(cache))
            }
            Err(e) => {
                warn!(error = %e, "Disk cache unavailable, running memory-only");
                None
            }
        }
    }
}

/// Loads images through memory, disk and network.
pub struct ImageLoader {
    pipeline: Arc<FetchPipeline>,
    dispatcher: TaskDispatcher,
    config: ImageLoaderConfig,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader that downloads over HTTP.
    ///
    /// If the disk cache cannot be opened the loader keeps working with the
    /// memory cache only.
    ///
    /// # Errors
    /// Returns error if the HTTP client or the worker pool cannot be created.
    pub fn new(config: &ImageLoaderConfig) -> Result<(Self, DeliveryQueue), LoaderError> {
        let fetcher = HttpImageFetcher::new(Duration::from_secs(config.timeout_secs))?;
        let disk_cache = config.open_disk_cache();
        Self::with_parts(config.clone(), Arc::new(fetcher), disk_cache)
    }

    /// Creates a loader from explicit capabilities.
    ///
    /// # Errors
    /// Returns error if the worker pool cannot be created.
    pub fn with_parts(
        config: ImageLoaderConfig,
        fetcher: Arc<dyn ImageFetchPort>,
        disk_cache: Option<Arc<dyn DiskCachePort>>,
    ) -> Result<(Self, DeliveryQueue), LoaderError> {
        let capacity_kib = config.memory_cache_kib.unwrap_or_else(default_capacity_kib);
        let memory_cache = Arc::new(MemoryImageCache::new(capacity_kib));

        let pipeline = Arc::new(FetchPipeline::new(
            memory_cache,
            disk_cache,
            fetcher,
            config.max_concurrent_downloads,
        ));
        let (dispatcher, queue) = TaskDispatcher::new(pipeline.clone(), &config.pool)?;

        info!(
            memory_kib = capacity_kib,
            disk = pipeline.disk_cache().is_some(),
            "Image loader ready"
        );

        Ok((
            Self {
                pipeline,
                dispatcher,
                config,
            },
            queue,
        ))
    }

    /// Requests an image without blocking.
    ///
    /// `on_result` runs immediately on a memory hit, otherwise through the
    /// [`DeliveryQueue`] returned at construction.
    pub fn submit<T, F>(&self, request: FetchRequest, target: T, on_result: F)
    where
        T: Send + 'static,
        F: FnOnce(T, LoadOutcome) + Send + 'static,
    {
        self.dispatcher.submit(request, target, on_result);
    }

    /// Loads an image on the caller's runtime.
    ///
    /// # Panics
    /// Panics if `ctx` is foreground and the image has to be downloaded.
    pub async fn load(&self, request: &FetchRequest, ctx: ExecutionContext) -> LoadOutcome {
        self.pipeline.load(request, ctx).await
    }

    /// Loads an image on the worker pool and waits for it.
    ///
    /// # Panics
    /// Panics if called from within an async runtime, or if `ctx` is
    /// foreground and the image has to be downloaded.
    pub fn load_blocking(&self, request: &FetchRequest, ctx: ExecutionContext) -> LoadOutcome {
        self.dispatcher.block_on(self.pipeline.load(request, ctx))
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.pipeline.memory_cache().stats()
    }

    /// Returns the number of submitted requests still running.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Returns the loader configuration.
    #[must_use]
    pub const fn config(&self) -> &ImageLoaderConfig {
        &self.config
    }

    /// Syncs the disk cache index.
    pub async fn flush(&self) {
        if let Some(disk) = self.pipeline.disk_cache()
            && let Err(e) = disk.flush().await
        {
            warn!(error = %e, "Failed to flush disk cache");
        }
    }

    /// Clears all caches.
    pub async fn clear_all(&self) {
        self.pipeline.memory_cache().clear();
        if let Some(disk) = self.pipeline.disk_cache()
            && let Err(e) = disk.clear().await
        {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!("Cleared all image caches");
    }
}
