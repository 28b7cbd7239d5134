//! Cache key derivation.
//!
//! Keys are the lowercase hex MD5 digest of the URL. Builds without the
//! `md5-keys` feature fall back to a decimal rendering of the standard
//! library hasher. That fallback is deterministic for a given build but has
//! no collision resistance, so cache partitioning degrades; it is logged
//! once and otherwise treated as normal operation.

use std::hash::{DefaultHasher, Hash, Hasher};

use crate::domain::entities::CacheKey;

/// Derives the cache key for a source URL.
#[must_use]
pub fn key_for(identifier: &str) -> CacheKey {
    #[cfg(feature = "md5-keys")]
    {
        digest_key(identifier)
    }

    #[cfg(not(feature = "md5-keys"))]
    {
        static WARN_ONCE: std::sync::Once = std::sync::Once::new();
        WARN_ONCE.call_once(|| {
            tracing::warn!("MD5 digest unavailable, using weak fallback cache keys");
        });
        fallback_key(identifier)
    }
}

/// MD5 digest of the identifier as 32 lowercase hex digits.
#[cfg(feature = "md5-keys")]
#[must_use]
pub fn digest_key(identifier: &str) -> CacheKey {
    let digest = md5::compute(identifier.as_bytes());
    CacheKey::new(hex::encode(digest.0))
}

/// Decimal rendering of the standard library hash of the identifier.
#[must_use]
pub fn fallback_key(identifier: &str) -> CacheKey {
    let mut hasher = DefaultHasher::new();
    identifier.hash(&mut hasher);
    CacheKey::new(hasher.finish().to_string())
}
