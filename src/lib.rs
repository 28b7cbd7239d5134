//! imgtier - asynchronous image fetching with memory and disk caches.
//!
//! Images are resolved from an in-memory LRU cache, then a disk LRU cache,
//! then the network. Decoding is downsampled to the requested size and work
//! runs on a bounded worker pool with results delivered back to the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imgtier";
