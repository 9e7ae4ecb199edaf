//! Stateless authentication tokens (HMAC-SHA-512 signed JWTs).
//!
//! ## Wire Format
//!
//! ```text
//! base64url({"typ":"JWT","alg":"HS512"}) . base64url(claims) . base64url(HMAC-SHA-512(header.claims))
//! ```
//!
//! Encoding and signature checks go through `jsonwebtoken`. Its own time
//! validation is switched off: expiry is checked here against the injected
//! [`Clock`], so tests can step time explicitly.
//!
//! Tokens travel in the `Authorization` header with a `Bearer ` prefix. They are
//! signed, not encrypted: anyone holding a token can read its claims.
//!
//! ## Validity
//!
//! A token is valid iff its signature verifies under the process signing key
//! AND the current time is strictly before `exp`. Validation is pure
//! computation: no store lookup, no revocation list.
//!
//! `iat` and `exp` are NumericDates with millisecond precision: integers on
//! whole seconds, fractional otherwise. A TTL below one millisecond is rounded
//! up to one.
//!
//! ## Failure Kinds
//!
//! | Error | Cause |
//! |-------|-------|
//! | `Expired` | `now >= exp` (signature was valid) |
//! | `Malformed` | segment structure, base64 or JSON is broken |
//! | `Unsupported` | unsigned token, unrecognized header, or `alg` other than `HS512` |
//! | `SignatureInvalid` | HMAC does not match |
//!
//! Middleware treats `Expired` as "log in again" and the rest as "reject".

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::error::Category;
use serde_json::{Map, Value};

use crate::clock::{Clock, SystemClock};

/// Request header carrying the token.
pub const AUTH_HEADER: &str = "Authorization";

/// Prefix in front of the token inside [`AUTH_HEADER`].
pub const TOKEN_PREFIX: &str = "Bearer ";

/// Lifetime used by [`TokenService::issue`]: 7 days.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Value of the `jti` claim on every issued token.
pub const TOKEN_ID: &str = "tokenId";

const ALGORITHM: Algorithm = Algorithm::HS512;

const CLAIM_ID: &str = "jti";
const CLAIM_ISSUED_AT: &str = "iat";
const CLAIM_EXPIRES_AT: &str = "exp";

/// Error returned by token issuance and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// No token was presented.
    #[error("Authentication token missing")]
    Missing,

    /// The token was genuine but its lifetime has ended.
    #[error("Authentication token expired at {expired_at}")]
    Expired {
        /// The `exp` claim of the token.
        expired_at: DateTime<Utc>,
    },

    /// The token is not a well-formed three-segment JWT.
    #[error("Authentication token malformed: {0}")]
    Malformed(String),

    /// The token uses a form or algorithm this service does not accept.
    #[error("Authentication token unsupported: {0}")]
    Unsupported(String),

    /// The signature does not match the header and claims.
    #[error("Authentication token signature does not match")]
    SignatureInvalid,

    /// The token could not be built.
    #[error("Authentication token could not be issued: {0}")]
    Issue(String),
}

impl TokenError {
    /// Whether the caller should be asked to log in again rather than rejected.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            JwtErrorKind::InvalidSignature => Self::SignatureInvalid,
            JwtErrorKind::InvalidAlgorithm
            | JwtErrorKind::InvalidAlgorithmName
            | JwtErrorKind::MissingAlgorithm => Self::Unsupported(e.to_string()),
            _ => Self::Malformed(e.to_string()),
        }
    }
}

/// Error building a [`SigningKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The key material is empty.
    #[error("Signing key must not be empty")]
    Empty,

    /// The configured secret is not valid base64.
    #[error("Signing key is not valid base64: {0}")]
    InvalidBase64(String),
}

/// Process-wide symmetric signing key.
///
/// Built once at startup and shared read-only.
#[derive(Clone)]
pub struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    /// Build a key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        })
    }

    /// Build a key by base64-decoding a configured secret (standard alphabet).
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| KeyError::InvalidBase64(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Claims recovered from a validated token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    /// Private claims exactly as issued (registered claims removed).
    pub custom: Map<String, Value>,
    /// The `jti` claim.
    pub token_id: Option<String>,
    /// The `iat` claim.
    pub issued_at: Option<DateTime<Utc>>,
    /// The `exp` claim. Tokens without one never expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenClaims {
    /// Look up a single private claim.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.custom.get(name)
    }

    /// Deserialize the private claims into a typed struct.
    pub fn custom_as<C: DeserializeOwned>(&self) -> Result<C, TokenError> {
        serde_json::from_value(Value::Object(self.custom.clone()))
            .map_err(|e| TokenError::Malformed(format!("claims do not match target type: {e}")))
    }
}

/// Issues and validates signed authentication tokens.
///
/// Thread-safe; clone freely (the key and clock are shared).
///
/// # Example
///
/// ```rust,ignore
/// let tokens = TokenService::new(SigningKey::from_base64(secret)?);
/// let token = tokens.issue(claims)?;
/// let verified = tokens.validate(&format!("Bearer {token}"))?;
/// ```
#[derive(Clone)]
pub struct TokenService {
    key: SigningKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl TokenService {
    /// Create a service signing with `key` against the system clock.
    pub fn new(key: SigningKey) -> Self {
        // Signature and algorithm only; time and audience are checked here.
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            key,
            validation,
            clock: Arc::new(SystemClock),
            default_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the lifetime used by [`issue`](Self::issue).
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Lifetime used by [`issue`](Self::issue).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Issue a token with the default lifetime.
    pub fn issue(&self, claims: Map<String, Value>) -> Result<String, TokenError> {
        self.issue_with_ttl(claims, self.default_ttl)
    }

    /// Issue a token carrying any serializable claims object.
    pub fn issue_claims<C: Serialize>(&self, claims: &C, ttl: Duration) -> Result<String, TokenError> {
        match serde_json::to_value(claims) {
            Ok(Value::Object(map)) => self.issue_with_ttl(map, ttl),
            Ok(_) => Err(TokenError::Issue("claims must serialize to a JSON object".to_string())),
            Err(e) => Err(TokenError::Issue(e.to_string())),
        }
    }

    /// Issue a token valid for `ttl` from now.
    ///
    /// Private claims named `jti`, `iat` or `exp` are overwritten.
    pub fn issue_with_ttl(
        &self,
        claims: Map<String, Value>,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let issued_at = whole_millis(self.clock.now());
        let expires_at = ttl_millis(ttl)
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or_else(|| TokenError::Issue(format!("ttl {ttl:?} is out of range")))?;

        let mut payload = claims;
        payload.insert(CLAIM_ID.to_string(), Value::from(TOKEN_ID));
        payload.insert(CLAIM_ISSUED_AT.to_string(), numeric_date(issued_at));
        payload.insert(CLAIM_EXPIRES_AT.to_string(), numeric_date(expires_at));

        encode(&Header::new(ALGORITHM), &payload, &self.key.encoding)
            .map_err(|e| TokenError::Issue(e.to_string()))
    }

    /// Validate a token, with or without its `Bearer ` prefix.
    pub fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let token = token.strip_prefix(TOKEN_PREFIX).unwrap_or(token).trim();

        if token.ends_with('.') && token.matches('.').count() == 2 {
            return Err(TokenError::Unsupported("unsigned tokens are not accepted".to_string()));
        }

        let header = decode_header(token).map_err(|e| match e.kind() {
            // Valid JSON that is not a header this service knows, e.g. no `alg`.
            JwtErrorKind::Json(cause) if cause.classify() == Category::Data => {
                TokenError::Unsupported(format!("unrecognized header: {cause}"))
            }
            _ => TokenError::from(e),
        })?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Unsupported(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let mut custom = decode::<Map<String, Value>>(token, &self.key.decoding, &self.validation)?.claims;
        let expires_at = timestamp_claim(&custom, CLAIM_EXPIRES_AT)?;
        let issued_at = timestamp_claim(&custom, CLAIM_ISSUED_AT)?;

        if let Some(expired_at) = expires_at {
            if self.clock.now() >= expired_at {
                return Err(TokenError::Expired { expired_at });
            }
        }

        let token_id = match custom.remove(CLAIM_ID) {
            Some(Value::String(id)) => Some(id),
            Some(_) => return Err(TokenError::Malformed("jti must be a string".to_string())),
            None => None,
        };
        custom.remove(CLAIM_ISSUED_AT);
        custom.remove(CLAIM_EXPIRES_AT);

        Ok(TokenClaims {
            custom,
            token_id,
            issued_at,
            expires_at,
        })
    }

    /// Validate the raw value of an `Authorization` header.
    pub fn validate_authorization(&self, header: Option<&str>) -> Result<TokenClaims, TokenError> {
        match header {
            Some(value) if !value.trim().is_empty() => self.validate(value),
            _ => Err(TokenError::Missing),
        }
    }

    /// Whether a genuine token has passed its expiry.
    ///
    /// Other validation failures are returned as errors.
    pub fn is_expired(&self, token: &str) -> Result<bool, TokenError> {
        match self.validate(token) {
            Ok(_) => Ok(false),
            Err(TokenError::Expired { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("key", &self.key)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

/// Truncate to the millisecond, the precision carried in tokens.
fn whole_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// `ttl` rounded up to whole milliseconds.
fn ttl_millis(ttl: Duration) -> Option<chrono::Duration> {
    let millis = ttl.as_nanos().div_ceil(1_000_000);
    i64::try_from(millis).ok().and_then(chrono::Duration::try_milliseconds)
}

/// NumericDate for `at`: whole seconds as an integer, otherwise fractional.
fn numeric_date(at: DateTime<Utc>) -> Value {
    let millis = at.timestamp_millis();
    if millis % 1000 == 0 {
        Value::from(millis / 1000)
    } else {
        Value::from(millis as f64 / 1000.0)
    }
}

fn timestamp_claim(claims: &Map<String, Value>, name: &str) -> Result<Option<DateTime<Utc>>, TokenError> {
    let Some(value) = claims.get(name) else {
        return Ok(None);
    };
    let millis = match value.as_i64() {
        Some(secs) => secs.checked_mul(1000),
        None => value.as_f64().map(|secs| (secs * 1000.0).round() as i64),
    };
    millis
        .and_then(DateTime::from_timestamp_millis)
        .map(Some)
        .ok_or_else(|| TokenError::Malformed(format!("{name} must be a Unix timestamp")))
}
