//! Image load error types.

use thiserror::Error;

/// Reasons a request produced no image.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("io error: {message}")]
    Io { message: String },
}

impl LoadError {
    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates io error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Returns whether resubmitting the request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(LoadError::network("timeout").is_transient());
        assert!(LoadError::io("disk full").is_transient());
        assert!(!LoadError::decode("not an image").is_transient());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(LoadError::network("HTTP 404").to_string(), "network error: HTTP 404");
    }
}
