//! HTTP implementation of the fetch port.

use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use crate::domain::ports::{ByteStream, FetchError, ImageFetchPort};

/// Downloads images with a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ImageFetchPort for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        debug!(url = %url, "Downloading image from network");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| FetchError::Body(e.to_string()))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        let fetcher = HttpImageFetcher::new(Duration::from_secs(5));
        assert!(fetcher.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_request_error() {
        let fetcher = HttpImageFetcher::new(Duration::from_secs(2)).unwrap();
        let result = fetcher.fetch("http://127.0.0.1:9/image.png").await;
        assert!(matches!(result, Err(FetchError::Request(_))));
    }
}
