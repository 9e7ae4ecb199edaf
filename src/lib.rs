//! # service-commons
//!
//! Cross-cutting concerns shared by HTTP microservice handlers.
//!
//! ## Components
//!
//! 1. [`ResponseEnvelope`]: uniform `{code, message, data}` wrapper for every outcome
//! 2. [`TokenService`]: stateless HMAC-SHA-512 signed JWTs
//! 3. [`CacheClient`]: fail-open typed cache over a remote store
//! 4. [`ErrorPolicyTable`]: ordered error-kind dispatch to failure envelopes
//! 5. [`ExecutionRecorder`]: per-call latency records with a slow-call threshold
//!
//! ## Architecture
//!
//! ```text
//! request → ExecutionRecorder → handler ─┬→ TokenService
//!                                        └→ CacheClient → CacheStore (Redis or Memory)
//!                     │
//!        Result<ResponseEnvelope<T>, ServiceError>
//!                     │
//!            ErrorPolicyTable::dispatch → ResponseEnvelope
//! ```
//!
//! ## Failure Guarantees
//!
//! - Cache outages degrade to cache misses and never reach the handler.
//! - Every handler error is translated exactly once, at the boundary.
//! - Recording never changes a call's outcome.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod policy;
pub mod recorder;
pub mod store;
pub mod token;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use cache::{generate_key, key_for, CacheClient, CacheOp, Nullable};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CommonsConfig, ConfigError, RecorderConfig, RedisConfig, TokenConfig};
pub use envelope::{EmptyList, ResponseEnvelope, SUCCESS_CODE, SUCCESS_MESSAGE};
pub use error::{BizError, BizErrorCode, ErrorKind, FieldViolation, ServiceError};
pub use policy::{ErrorPolicyEntry, ErrorPolicyTable, LogDetail, MessageSource, StatusSource};
pub use recorder::{
    CallArgs, CallTimer, ExecutionRecord, ExecutionRecorder, MemorySink, Operation, Outcome,
    RecordLevel, RecordSink, TracingSink,
};
pub use store::{CacheStore, InMemoryStore, StoreError};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use token::{
    SigningKey, TokenClaims, TokenError, TokenService, AUTH_HEADER, DEFAULT_TOKEN_TTL, TOKEN_PREFIX,
};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, Authenticated, ServiceState};
