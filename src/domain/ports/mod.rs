mod image_cache_port;
mod image_fetch_port;

pub use image_cache_port::{
    CacheEditor, CacheError, CacheResult, DiskCachePort, EditSlot, EditWait,
};
pub use image_fetch_port::{ByteStream, FetchError, ImageFetchPort};
