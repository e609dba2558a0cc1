//! Cache-aside building blocks.
//!
//! - [`CacheStore`]: failure-isolating adapter over a [`CacheBackend`]
//! - [`MemoryBackend`]: in-process LRU backend with per-entry expiry
//! - [`KeySpace`]: deterministic key derivation for detail and list reads
//! - [`codec`]: versioned byte encoding of cached values
//!
//! The Redis backend lives in [`crate::infra::cache`].
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "redis"
//! list_ttl_seconds = 60
//! detail_ttl_seconds = 300
//! ```

pub mod codec;
mod config;
mod keys;
mod memory;
mod store;

pub use codec::{CacheShape, CodecError};
pub use config::{CacheConfig, defaults};
pub use keys::KeySpace;
pub use memory::MemoryBackend;
pub use store::{BackendError, CacheBackend, CacheStore, CacheUnavailable};
