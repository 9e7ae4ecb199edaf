//! Fail-open cache client.
//!
//! ## Failure Policy
//!
//! The cache is an optimization, never a source of truth. Every operation is
//! fail-open: a store outage, a timeout or an undecodable value degrades to
//! cache-miss behavior and never reaches the caller as an error.
//!
//! The policy lives in one place, [`absorb`], which logs the failed
//! [`CacheOp`] with its key (and value, for writes). Call sites only pick the
//! no-op result.
//!
//! ## Value Encoding
//!
//! Every value is stored as its JSON document, strings included, so a stored
//! `"42"` and a stored `42` stay distinct.
//!
//! | Read | Returns |
//! |------|---------|
//! | [`CacheClient::get`] | string documents unquoted, anything else as JSON text |
//! | [`CacheClient::get_typed`] | the document parsed into the requested type |
//!
//! ## Key Generation
//!
//! Cached method results use `type:method:arg1:arg2…` keys built from each
//! argument's `Display` form, in declaration order. Keys written by earlier
//! deployments stay addressable as long as argument formatting is unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::store::{CacheStore, StoreError};

/// Rendering of an absent argument in generated keys.
pub const NULL_ARG: &str = "null";

/// Cache operation that failed, as reported by [`absorb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp<'a> {
    /// A read (`get`, `get_typed`, `exists`).
    Get {
        /// Key being read.
        key: &'a str,
    },
    /// A write (`put`, `put_if_absent`).
    Put {
        /// Key being written.
        key: &'a str,
        /// Encoded value, when encoding got that far.
        value: Option<&'a str>,
    },
    /// Removal of specific keys.
    Evict {
        /// Keys being removed.
        keys: &'a [String],
    },
    /// Removal of a whole key namespace.
    Clear {
        /// Namespace prefix.
        prefix: &'a str,
    },
}

impl CacheOp<'_> {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Put { .. } => "put",
            Self::Evict { .. } => "evict",
            Self::Clear { .. } => "clear",
        }
    }
}

/// Why a cache operation fell back to its no-op result.
#[derive(Debug, thiserror::Error)]
pub enum CacheFailure {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The value could not be encoded or decoded.
    #[error("Cache value codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Log a failed cache operation.
///
/// This is the only error handling the cache performs; the caller then returns
/// its no-op result (`false`, `None`, or nothing).
pub fn absorb(op: &CacheOp<'_>, failure: &CacheFailure) {
    match op {
        CacheOp::Get { key } => {
            tracing::error!(
                target: "service_commons::cache",
                operation = op.name(),
                key = %key,
                error = %failure,
                "Cache get failed, treating as miss"
            );
        }
        CacheOp::Put { key, value } => {
            tracing::error!(
                target: "service_commons::cache",
                operation = op.name(),
                key = %key,
                value = value.unwrap_or("<unencoded>"),
                error = %failure,
                "Cache put failed, value not stored"
            );
        }
        CacheOp::Evict { keys } => {
            tracing::error!(
                target: "service_commons::cache",
                operation = op.name(),
                keys = ?keys,
                error = %failure,
                "Cache evict failed"
            );
        }
        CacheOp::Clear { prefix } => {
            tracing::error!(
                target: "service_commons::cache",
                operation = op.name(),
                prefix = %prefix,
                error = %failure,
                "Cache clear failed"
            );
        }
    }
}

/// Encode a value for storage.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Decode stored text into `T`.
pub fn decode_value<T: DeserializeOwned>(stored: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(stored)
}

/// Primitive form of stored text: a string document loses its quotes.
///
/// Text that is not JSON (written by another client) is returned as is.
pub fn plain_text(stored: String) -> String {
    match serde_json::from_str::<Value>(&stored) {
        Ok(Value::String(text)) => text,
        _ => stored,
    }
}

/// An argument that may be absent; renders as `null` when it is.
#[derive(Debug, Clone, Copy)]
pub struct Nullable<T>(pub Option<T>);

impl<T: fmt::Display> fmt::Display for Nullable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str(NULL_ARG),
        }
    }
}

/// Build a cache key: `type_name:method:arg1:arg2…`.
pub fn generate_key(type_name: &str, method: &str, args: &[&dyn fmt::Display]) -> String {
    let mut key = format!("{type_name}:{method}");
    for arg in args {
        key.push(':');
        key.push_str(&arg.to_string());
    }
    tracing::debug!(target: "service_commons::cache", key = %key, "Generated cache key");
    key
}

/// Build a cache key for a method of `T`, using its full type path.
pub fn key_for<T: ?Sized>(method: &str, args: &[&dyn fmt::Display]) -> String {
    generate_key(std::any::type_name::<T>(), method, args)
}

/// Typed, fail-open façade over a remote store.
///
/// Holds no entries itself; clones share the same store handle.
pub struct CacheClient<S: CacheStore> {
    store: Arc<S>,
}

impl<S: CacheStore> Clone for CacheClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CacheStore> CacheClient<S> {
    /// Wrap a store.
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Wrap a store that is already shared.
    pub fn from_shared(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Store `value` under `key`.
    ///
    /// `ttl` of `None` or zero stores without expiry. Returns `false` if the
    /// value could not be encoded or stored.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let encoded = match encode_value(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                absorb(&CacheOp::Put { key, value: None }, &e.into());
                return false;
            }
        };
        let ttl = ttl.filter(|ttl| !ttl.is_zero());

        match self.store.set(key, &encoded, ttl).await {
            Ok(()) => true,
            Err(e) => {
                absorb(&CacheOp::Put { key, value: Some(&encoded) }, &e.into());
                false
            }
        }
    }

    /// Store `value` only if `key` is absent.
    ///
    /// Returns `true` only when this call inserted the value.
    pub async fn put_if_absent<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let encoded = match encode_value(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                absorb(&CacheOp::Put { key, value: None }, &e.into());
                return false;
            }
        };

        match self.store.set_if_absent(key, &encoded).await {
            Ok(inserted) => inserted,
            Err(e) => {
                absorb(&CacheOp::Put { key, value: Some(&encoded) }, &e.into());
                false
            }
        }
    }

    /// Value under `key` in its primitive form.
    ///
    /// String values come back unquoted; other values as their JSON text.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.fetch(key).await.map(plain_text)
    }

    async fn fetch(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                absorb(&CacheOp::Get { key }, &e.into());
                None
            }
        }
    }

    /// Value under `key` decoded as `T`.
    ///
    /// Missing keys, store failures and values that do not decode as `T` all
    /// yield `None`.
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let stored = self.fetch(key).await?;
        match decode_value(&stored) {
            Ok(value) => Some(value),
            Err(e) => {
                absorb(&CacheOp::Get { key }, &e.into());
                None
            }
        }
    }

    /// Whether `key` is present. Store failures read as absent.
    pub async fn exists(&self, key: &str) -> bool {
        match self.store.exists(key).await {
            Ok(present) => present,
            Err(e) => {
                absorb(&CacheOp::Get { key }, &e.into());
                false
            }
        }
    }

    /// Best-effort removal of `keys`.
    pub async fn delete(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.store.delete(keys).await {
            absorb(&CacheOp::Evict { keys }, &e.into());
        }
    }

    /// Best-effort removal of every key in the `prefix` namespace.
    pub async fn clear(&self, prefix: &str) {
        match self.store.delete_prefix(prefix).await {
            Ok(removed) => {
                tracing::debug!(target: "service_commons::cache", prefix = %prefix, removed, "Cache namespace cleared");
            }
            Err(e) => absorb(&CacheOp::Clear { prefix }, &e.into()),
        }
    }

    /// Read-through caching around `compute`.
    ///
    /// Returns the cached value when present. Otherwise runs `compute`,
    /// stores its result (fail-open) and returns it. Errors from `compute`
    /// propagate untouched and nothing is stored.
    pub async fn get_or_insert_with<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_typed::<T>(key).await {
            return Ok(hit);
        }
        let value = compute().await?;
        self.put(key, &value, ttl).await;
        Ok(value)
    }
}
