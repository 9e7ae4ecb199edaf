//! Process configuration, loaded once at startup.
//!
//! ## Environment Variables
//!
//! - `COMMONS_TOKEN_SECRET`: base64 signing secret (default: development secret)
//! - `COMMONS_TOKEN_TTL_SECS`: token lifetime in seconds (default: 604800 = 7 days)
//! - `REDIS_URL`: Redis connection URL (default: `redis://127.0.0.1:6379/0`)
//! - `REDIS_TIMEOUT_MS`: connect/response timeout (default: 2000)
//! - `COMMONS_SLOW_CALL_MS`: execution recorder warn threshold (default: 1000)
//!
//! Values are read once and passed by reference into the components that need
//! them; nothing reads the environment after startup.

use std::time::Duration;

use crate::token::{KeyError, SigningKey, DEFAULT_TOKEN_TTL};

/// Signing secret used when `COMMONS_TOKEN_SECRET` is unset. Development only.
pub const DEVELOPMENT_TOKEN_SECRET: &str = "ERWlLFI49q4WjCYu";

/// Error loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },

    /// The signing secret cannot be turned into a key.
    #[error("Invalid token secret: {0}")]
    Secret(#[from] KeyError),
}

/// Token service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    /// Base64 (standard alphabet) signing secret.
    pub secret_base64: String,
    /// Lifetime of tokens issued without an explicit ttl.
    pub ttl: Duration,
    /// Whether the secret came from the built-in development default.
    pub using_development_secret: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret_base64: DEVELOPMENT_TOKEN_SECRET.to_string(),
            ttl: DEFAULT_TOKEN_TTL,
            using_development_secret: true,
        }
    }
}

impl TokenConfig {
    /// Decode the configured secret into a signing key.
    pub fn signing_key(&self) -> Result<SigningKey, ConfigError> {
        Ok(SigningKey::from_base64(&self.secret_base64)?)
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://:password@host:6379/0`.
    pub url: String,
    /// Connect and per-command response timeout.
    pub timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            timeout: Duration::from_millis(2000),
        }
    }
}

impl RedisConfig {
    /// URL with any password replaced, safe to log.
    pub fn redacted_url(&self) -> String {
        match (self.url.find("://"), self.url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***{}", &self.url[..scheme_end], &self.url[at..])
            }
            _ => self.url.clone(),
        }
    }
}

/// Execution recorder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Calls at or above this duration are logged at `warn`.
    pub slow_threshold: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_millis(1000),
        }
    }
}

/// All settings for the shared components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonsConfig {
    /// Token service.
    pub token: TokenConfig,
    /// Remote cache store.
    pub redis: RedisConfig,
    /// Execution recorder.
    pub recorder: RecorderConfig,
}

impl CommonsConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let token = match lookup("COMMONS_TOKEN_SECRET").filter(|s| !s.trim().is_empty()) {
            Some(secret) => TokenConfig {
                secret_base64: secret,
                ttl: parse_duration(&lookup, "COMMONS_TOKEN_TTL_SECS", Duration::from_secs)?
                    .unwrap_or(defaults.token.ttl),
                using_development_secret: false,
            },
            None => TokenConfig {
                ttl: parse_duration(&lookup, "COMMONS_TOKEN_TTL_SECS", Duration::from_secs)?
                    .unwrap_or(defaults.token.ttl),
                ..defaults.token
            },
        };
        // Fail at startup rather than on the first request.
        token.signing_key()?;

        let redis = RedisConfig {
            url: lookup("REDIS_URL").unwrap_or(defaults.redis.url),
            timeout: parse_duration(&lookup, "REDIS_TIMEOUT_MS", Duration::from_millis)?
                .unwrap_or(defaults.redis.timeout),
        };

        let recorder = RecorderConfig {
            slow_threshold: parse_duration(&lookup, "COMMONS_SLOW_CALL_MS", Duration::from_millis)?
                .unwrap_or(defaults.recorder.slow_threshold),
        };

        Ok(Self {
            token,
            redis,
            recorder,
        })
    }
}

fn parse_duration<F>(
    lookup: &F,
    name: &'static str,
    unit: fn(u64) -> Duration,
) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|n| Some(unit(n)))
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CommonsConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CommonsConfig::default());
        assert!(config.token.using_development_secret);
        assert_eq!(config.token.ttl, Duration::from_secs(604_800));
        assert_eq!(config.recorder.slow_threshold, Duration::from_millis(1000));
    }

    #[test]
    fn test_overrides() {
        let config = CommonsConfig::from_lookup(lookup(&[
            ("COMMONS_TOKEN_SECRET", "c2VjcmV0LWtleQ=="),
            ("COMMONS_TOKEN_TTL_SECS", "3600"),
            ("REDIS_URL", "redis://cache:6380/2"),
            ("REDIS_TIMEOUT_MS", "250"),
            ("COMMONS_SLOW_CALL_MS", "500"),
        ]))
        .unwrap();

        assert!(!config.token.using_development_secret);
        assert_eq!(config.token.ttl, Duration::from_secs(3600));
        assert_eq!(config.redis.url, "redis://cache:6380/2");
        assert_eq!(config.redis.timeout, Duration::from_millis(250));
        assert_eq!(config.recorder.slow_threshold, Duration::from_millis(500));
        assert!(config.token.signing_key().is_ok());
    }

    #[test]
    fn test_invalid_number() {
        let err = CommonsConfig::from_lookup(lookup(&[("REDIS_TIMEOUT_MS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "REDIS_TIMEOUT_MS",
                value: "soon".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_secret() {
        let err = CommonsConfig::from_lookup(lookup(&[("COMMONS_TOKEN_SECRET", "not base64!")])).unwrap_err();
        assert!(matches!(err, ConfigError::Secret(KeyError::InvalidBase64(_))));
    }

    #[test]
    fn test_redacted_url() {
        let config = RedisConfig {
            url: "redis://:hunter2@cache:6379/0".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(config.redacted_url(), "redis://***@cache:6379/0");
        assert_eq!(RedisConfig::default().redacted_url(), "redis://127.0.0.1:6379/0");
    }
}
