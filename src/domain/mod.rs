//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, DecodedImage, ExecutionContext, FetchRequest, LoadOutcome};
pub use errors::LoadError;
pub use ports::{DiskCachePort, ImageFetchPort};
