//! Port definition for downloading image bytes.

use bytes::Bytes;
use futures_util::stream::BoxStream;

/// Stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Errors that can occur while downloading.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Request could not be sent.
    #[error("Request failed: {0}")]
    Request(String),
    /// Server answered with a non-success status.
    #[error("HTTP {0}")]
    Status(u16),
    /// Body could not be read.
    #[error("Failed to read body: {0}")]
    Body(String),
}

/// Port for plain GET downloads. No retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ImageFetchPort: Send + Sync {
    /// Starts a download and returns the body as a stream of chunks.
    async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::StreamExt;

    /// Encodes a blank PNG of the given size.
    pub fn png_bytes(width: u32, height: u32) -> Bytes {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .expect("png encoding");
        Bytes::from(out.into_inner())
    }

    /// In-memory fetcher that serves fixed bodies and counts downloads.
    #[derive(Default)]
    pub struct StaticImageFetcher {
        bodies: HashMap<String, Bytes>,
        delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
    }

    impl StaticImageFetcher {
        /// Creates a fetcher with no bodies.
        pub fn new() -> Self {
            Self::default()
        }

        /// Serves `body` for `url`.
        pub fn with_body(mut self, url: &str, body: Bytes) -> Self {
            self.bodies.insert(url.to_string(), body);
            self
        }

        /// Delays the body by `delay`.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Number of downloads started.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ImageFetchPort for StaticImageFetcher {
        async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self.bodies.get(url).cloned().ok_or(FetchError::Status(404))?;
            let delay = self.delay;

            let stream = futures_util::stream::once(async move {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                Ok(body)
            });
            Ok(stream.boxed())
        }
    }
}
