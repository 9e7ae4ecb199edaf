//! Remote key-value store backends for the cache client.

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

/// Error raised by a store backend.
///
/// Never escapes [`CacheClient`](crate::cache::CacheClient); it is logged and
/// absorbed there.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, dropped, timed out).
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error.
    #[error("Cache store command failed: {0}")]
    Command(String),
}

/// Trait for remote key-value stores.
///
/// Implementations hold no client-side copies of entries; every call is a
/// round trip. Atomicity of `set_if_absent` is the store's responsibility.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the stored text under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Whether `key` is present.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove `keys`. Returns how many were present.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Remove every key starting with `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;
}

pub use memory::InMemoryStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
