//! Redis store for production use.
//!
//! ## Encoding
//!
//! Keys and values are plain Redis strings. Expiry uses `SET … PX` so sub-second
//! ttls survive; `set_if_absent` is `SETNX`; namespace clears use `KEYS prefix*`
//! followed by one `DEL`.
//!
//! ## Timeouts
//!
//! Connect and response timeouts come from [`RedisConfig`]. A timed-out
//! command surfaces as [`StoreError::Unavailable`], which the cache client
//! absorbs like any other outage.

use std::time::Duration;

use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{AsyncCommands, RedisError};
use async_trait::async_trait;

use super::{CacheStore, StoreError};
use crate::config::RedisConfig;

const HEALTH_PROBE_KEY: &str = "service-commons:health";

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_timeout() || e.is_connection_refusal() || e.is_connection_dropped() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

/// Redis-backed store.
///
/// Cheap to clone; clones share one multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect using the given configuration.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        tracing::info!(
            url = %config.redacted_url(),
            timeout_ms = config.timeout.as_millis() as u64,
            "Initializing Redis connection manager"
        );

        let client = ::redis::Client::open(config.url.as_str())?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.timeout)
            .set_response_timeout(config.timeout);
        let conn = ConnectionManager::new_with_config(client, manager_config).await?;

        Ok(Self { conn })
    }

    /// Check if Redis completes a round trip.
    pub async fn is_healthy(&self) -> bool {
        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(HEALTH_PROBE_KEY).await.is_ok()
    }
}

/// Escape glob metacharacters so a prefix matches literally in `KEYS`.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.set_nx::<_, _, bool>(key, value).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del::<_, u64>(keys).await?)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(glob_escape(prefix)).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(conn.del::<_, u64>(keys).await?)
    }
}
