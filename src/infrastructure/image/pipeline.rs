//! Three-tier image loading: Memory -> Disk -> Network.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::entities::{
    CacheKey, DecodedImage, ExecutionContext, FetchRequest, ImageSource, LoadOutcome, LoadedImage,
};
use crate::domain::errors::LoadError;
use crate::domain::ports::{CacheEditor, DiskCachePort, EditSlot, ImageFetchPort};

use super::downsampler::decode_bytes;
use super::key_hasher::key_for;
use super::memory_cache::MemoryImageCache;

/// Resolves requests against the memory cache, the disk cache and the network.
///
/// Network results always go through the disk cache and are decoded from
/// there, so there is one decode path and one place that fills the memory
/// cache.
pub struct FetchPipeline {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Option<Arc<dyn DiskCachePort>>,
    fetcher: Arc<dyn ImageFetchPort>,
    download_permits: Semaphore,
}

impl std::fmt::Debug for FetchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPipeline")
            .field("disk_cache", &self.disk_cache.is_some())
            .field("download_permits", &self.download_permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl FetchPipeline {
    /// Creates a pipeline. Without a disk cache it runs memory-only.
    #[must_use]
    pub fn new(
        memory_cache: Arc<MemoryImageCache>,
        disk_cache: Option<Arc<dyn DiskCachePort>>,
        fetcher: Arc<dyn ImageFetchPort>,
        max_concurrent_downloads: usize,
    ) -> Self {
        Self {
            memory_cache,
            disk_cache,
            fetcher,
            download_permits: Semaphore::new(max_concurrent_downloads.max(1)),
        }
    }

    /// Returns the memory tier.
    #[must_use]
    pub const fn memory_cache(&self) -> &Arc<MemoryImageCache> {
        &self.memory_cache
    }

    /// Returns the disk tier, if one is available.
    #[must_use]
    pub fn disk_cache(&self) -> Option<&Arc<dyn DiskCachePort>> {
        self.disk_cache.as_ref()
    }

    /// Checks the memory tier only. Never blocks on I/O.
    #[must_use]
    pub fn lookup_memory(&self, request: &FetchRequest) -> Option<LoadedImage> {
        let key = key_for(&request.url);
        let image = self.memory_cache.get(&key)?;
        Some(LoadedImage {
            key,
            image,
            source: ImageSource::MemoryCache,
        })
    }

    /// Loads an image, checking caches first.
    ///
    /// # Panics
    /// Panics if the request reaches the network tier from
    /// [`ExecutionContext::Foreground`].
    pub async fn load(&self, request: &FetchRequest, ctx: ExecutionContext) -> LoadOutcome {
        if let Some(loaded) = self.lookup_memory(request) {
            return LoadOutcome::Found(loaded);
        }

        let key = key_for(&request.url);
        let Some(disk) = self.disk_cache.clone() else {
            return self.load_without_disk(key, request, ctx).await;
        };

        match self.load_from_disk(disk.as_ref(), &key, request, ctx).await {
            LoadOutcome::Found(loaded) => return LoadOutcome::Found(loaded),
            LoadOutcome::NotFound => {}
            LoadOutcome::Failed(e) => {
                debug!(key = %key, error = %e, "Disk tier failed, falling back to network");
            }
        }

        self.load_from_network(disk.as_ref(), key, request, ctx).await
    }

    async fn load_from_disk(
        &self,
        disk: &dyn DiskCachePort,
        key: &CacheKey,
        request: &FetchRequest,
        ctx: ExecutionContext,
    ) -> LoadOutcome {
        if ctx.is_foreground() {
            warn!(key = %key, "Disk cache read on the foreground context");
        }

        let bytes = match disk.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return LoadOutcome::NotFound,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read disk cache");
                return LoadOutcome::Failed(LoadError::io(e.to_string()));
            }
        };

        match decode(bytes, request).await {
            Ok(image) => {
                debug!(key = %key, "Decoded image from disk cache");
                LoadOutcome::Found(self.remember(key.clone(), image, ImageSource::DiskCache))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to decode cached image, dropping it");
                disk.remove(key).await;
                LoadOutcome::Failed(e)
            }
        }
    }

    async fn load_from_network(
        &self,
        disk: &dyn DiskCachePort,
        key: CacheKey,
        request: &FetchRequest,
        ctx: ExecutionContext,
    ) -> LoadOutcome {
        assert_off_foreground(ctx, &request.url);

        let mut downloaded = false;
        let mut failure = None;

        match disk.begin_write(&key).await {
            Ok(EditSlot::Busy(wait)) => {
                debug!(key = %key, "Download already in flight, waiting for it");
                wait.finished().await;
            }
            Ok(EditSlot::Acquired(editor)) => {
                if disk.contains(&key).await {
                    debug!(key = %key, "Entry committed by a concurrent download");
                    editor.abort().await;
                } else {
                    downloaded = true;
                    failure = self.download_into(editor, &key, &request.url).await.err();
                    if let Err(e) = disk.flush().await {
                        warn!(key = %key, error = %e, "Failed to flush disk cache");
                    }
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to open disk cache entry");
                failure = Some(LoadError::io(e.to_string()));
            }
        }

        match self.load_from_disk(disk, &key, request, ctx).await {
            LoadOutcome::Found(mut loaded) => {
                if downloaded {
                    loaded.source = ImageSource::Network;
                }
                debug!(key = %key, source = %loaded.source, "Image loaded successfully");
                LoadOutcome::Found(loaded)
            }
            LoadOutcome::NotFound => failure.map_or(LoadOutcome::NotFound, LoadOutcome::Failed),
            failed => failed,
        }
    }

    /// Streams the body into `editor`, committing on success and aborting otherwise.
    async fn download_into(
        &self,
        mut editor: Box<dyn CacheEditor>,
        key: &CacheKey,
        url: &str,
    ) -> Result<(), LoadError> {
        match self.stream_into(editor.as_mut(), url).await {
            Ok(size) => {
                editor
                    .commit()
                    .await
                    .map_err(|e| LoadError::io(e.to_string()))?;
                debug!(key = %key, size, "Downloaded image into disk cache");
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Download failed");
                editor.abort().await;
                Err(e)
            }
        }
    }

    async fn stream_into(
        &self,
        editor: &mut dyn CacheEditor,
        url: &str,
    ) -> Result<u64, LoadError> {
        let _permit = self
            .download_permits
            .acquire()
            .await
            .map_err(|e| LoadError::network(e.to_string()))?;

        let mut body = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| LoadError::network(e.to_string()))?;

        let mut size = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| LoadError::network(e.to_string()))?;
            editor
                .write(&chunk)
                .await
                .map_err(|e| LoadError::io(e.to_string()))?;
            size += chunk.len() as u64;
        }
        Ok(size)
    }

    /// Memory-only mode: download to a buffer and decode from it.
    async fn load_without_disk(
        &self,
        key: CacheKey,
        request: &FetchRequest,
        ctx: ExecutionContext,
    ) -> LoadOutcome {
        assert_off_foreground(ctx, &request.url);

        let bytes = match self.download(&request.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Download failed");
                return LoadOutcome::Failed(e);
            }
        };

        match decode(bytes, request).await {
            Ok(image) => LoadOutcome::Found(self.remember(key, image, ImageSource::Network)),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to decode downloaded image");
                LoadOutcome::Failed(e)
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Bytes, LoadError> {
        let _permit = self
            .download_permits
            .acquire()
            .await
            .map_err(|e| LoadError::network(e.to_string()))?;

        let mut body = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| LoadError::network(e.to_string()))?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk.map_err(|e| LoadError::network(e.to_string()))?);
        }
        Ok(buf.freeze())
    }

    fn remember(&self, key: CacheKey, image: DecodedImage, source: ImageSource) -> LoadedImage {
        let image = Arc::new(image);
        self.memory_cache.put(key.clone(), image.clone());
        LoadedImage { key, image, source }
    }
}

fn assert_off_foreground(ctx: ExecutionContext, url: &str) {
    assert!(
        !ctx.is_foreground(),
        "network I/O requested from the foreground context for {url}"
    );
}

async fn decode(bytes: Bytes, request: &FetchRequest) -> Result<DecodedImage, LoadError> {
    let (width, height) = (request.width, request.height);
    tokio::task::spawn_blocking(move || decode_bytes(&bytes, width, height))
        .await
        .map_err(|e| LoadError::decode(format!("Decode task panicked: {e}")))?
        .map_err(|e| LoadError::decode(e.to_string()))
}
