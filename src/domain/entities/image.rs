//! Domain types for the image pipeline.

use std::sync::Arc;

use crate::domain::errors::LoadError;

/// Cache key shared by the memory and disk tiers.
/// Derived from the image URL, see [`crate::infrastructure::image::key_for`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an already derived key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A request for an image bounded by a target box.
///
/// A target width or height of `0` means "decode at the native size".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Source URL.
    pub url: String,
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
}

impl FetchRequest {
    /// Creates a request that decodes at the native size.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width: 0,
            height: 0,
        }
    }

    /// Sets the target bounding box.
    #[must_use]
    pub const fn with_target(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// A decoded pixel buffer. Immutable once created.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: image::DynamicImage,
    native_width: u32,
    native_height: u32,
    sample_size: u32,
}

impl DecodedImage {
    /// Wraps a decoded image together with its pre-sampling dimensions.
    #[must_use]
    pub fn new(
        pixels: image::DynamicImage,
        native_width: u32,
        native_height: u32,
        sample_size: u32,
    ) -> Self {
        Self {
            pixels,
            native_width,
            native_height,
            sample_size,
        }
    }

    /// Wraps an image that was decoded at its native size.
    #[must_use]
    pub fn unsampled(pixels: image::DynamicImage) -> Self {
        let (w, h) = (pixels.width(), pixels.height());
        Self::new(pixels, w, h, 1)
    }

    /// Decoded width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Decoded height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Width of the source image before sampling.
    #[must_use]
    pub const fn native_width(&self) -> u32 {
        self.native_width
    }

    /// Height of the source image before sampling.
    #[must_use]
    pub const fn native_height(&self) -> u32 {
        self.native_height
    }

    /// Sampling factor requested from the decoder.
    #[must_use]
    pub const fn sample_size(&self) -> u32 {
        self.sample_size
    }

    /// Bytes per pixel row.
    #[must_use]
    pub fn row_bytes(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.pixels.color().bytes_per_pixel())
    }

    /// Size of the pixel buffer in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.row_bytes() * u64::from(self.height())
    }

    /// Memory cache cost in whole KiB, rounded up.
    #[must_use]
    pub fn cost_kib(&self) -> u64 {
        self.byte_size().div_ceil(1024)
    }

    /// Borrows the underlying pixels.
    #[must_use]
    pub const fn pixels(&self) -> &image::DynamicImage {
        &self.pixels
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from in-memory LRU cache.
    MemoryCache,
    /// Loaded from disk cache.
    DiskCache,
    /// Downloaded from network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A successfully loaded image.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key of the image.
    pub key: CacheKey,
    /// Decoded pixels, shared with the memory cache.
    pub image: Arc<DecodedImage>,
    /// Tier that produced the image.
    pub source: ImageSource,
}

/// Result of running a request through the pipeline.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// The image was found in one of the tiers.
    Found(LoadedImage),
    /// Every tier missed without an error.
    NotFound,
    /// A tier failed; the request produced no image.
    Failed(LoadError),
}

impl LoadOutcome {
    /// Returns true if an image was produced.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Returns the loaded image, if any.
    #[must_use]
    pub fn image(&self) -> Option<&LoadedImage> {
        match self {
            Self::Found(loaded) => Some(loaded),
            _ => None,
        }
    }

    /// Consumes the outcome and returns the loaded image, if any.
    #[must_use]
    pub fn into_image(self) -> Option<LoadedImage> {
        match self {
            Self::Found(loaded) => Some(loaded),
            _ => None,
        }
    }

    /// Returns the failure, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&LoadError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Execution context a call is made from.
///
/// Network I/O from [`ExecutionContext::Foreground`] is a programmer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    /// The interactive thread; must never block.
    Foreground,
    /// A background worker.
    #[default]
    Worker,
}

impl ExecutionContext {
    /// Returns true for the foreground context.
    #[must_use]
    pub const fn is_foreground(self) -> bool {
        matches!(self, Self::Foreground)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoded_image_cost() {
        let img = DecodedImage::unsampled(image::DynamicImage::new_rgba8(32, 32));
        assert_eq!(img.row_bytes(), 128);
        assert_eq!(img.byte_size(), 4096);
        assert_eq!(img.cost_kib(), 4);
    }

    #[test]
    fn test_cost_rounds_up() {
        let img = DecodedImage::unsampled(image::DynamicImage::new_rgb8(1, 1));
        assert_eq!(img.byte_size(), 3);
        assert_eq!(img.cost_kib(), 1);
    }

    #[test]
    fn test_fetch_request_defaults_to_native_size() {
        let req = FetchRequest::new("https://example.com/a.png");
        assert_eq!((req.width, req.height), (0, 0));

        let req = req.with_target(100, 50);
        assert_eq!((req.width, req.height), (100, 50));
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = LoadOutcome::Failed(LoadError::network("boom"));
        assert!(!outcome.is_found());
        assert!(outcome.image().is_none());
        assert!(outcome.error().is_some());
    }
}
