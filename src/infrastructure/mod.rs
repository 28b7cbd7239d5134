//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (hashing, decoding, caching, loading).
pub mod image;

pub use config::{AppConfig, CliArgs, Command, ConfigStore, LogLevel};
pub use image::{
    CacheStats, DeliveryQueue, DiskImageCache, FetchPipeline, HttpImageFetcher, ImageLoader,
    ImageLoaderConfig, MemoryImageCache, PoolConfig, TaskDispatcher,
};
