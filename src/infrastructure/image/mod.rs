//! Image handling infrastructure.
//!
//! This module provides:
//! - Cache key hashing
//! - Downsampled decoding
//! - Memory caching with cost-bounded LRU eviction
//! - Disk caching with exclusive per-key edits
//! - The memory -> disk -> network pipeline and its worker pool

pub mod dispatcher;
pub mod disk_cache;
pub mod downsampler;
pub mod http_fetcher;
pub mod key_hasher;
pub mod loader;
pub mod memory_cache;
pub mod pipeline;

pub use dispatcher::{DeliveryQueue, PoolConfig, TaskDispatcher};
pub use disk_cache::DiskImageCache;
pub use downsampler::{
    DecodeError, calculate_sample_size, decode_bytes, decode_file, decode_resource,
};
pub use http_fetcher::HttpImageFetcher;
pub use key_hasher::key_for;
pub use loader::{ImageLoader, ImageLoaderConfig, LoaderError};
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use pipeline::FetchPipeline;
