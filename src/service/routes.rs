//! Axum routes for the demo service.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Json, Path, State,
    },
    http::Method,
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::catch_panic::CatchPanicLayer;

use super::auth::Authenticated;
use super::middleware::{
    correlate_request, error_boundary, panic_to_error, record_execution, Instrumentation,
};
use super::state::{OperationRegistry, ServiceState};
use crate::envelope::{EmptyList, ResponseEnvelope};
use crate::error::{FieldViolation, ServiceError};
use crate::policy::ErrorPolicyTable;
use crate::recorder::Operation;
use crate::store::CacheStore;

#[cfg(feature = "redis")]
use crate::store::RedisStore;

/// Type alias for the service state with RedisStore.
#[cfg(feature = "redis")]
pub type AppState = ServiceState<RedisStore>;

/// Result type of every handler.
pub type HandlerResult<T> = Result<ResponseEnvelope<T>, ServiceError>;

/// Business code for a cache key with no value.
pub const CACHE_MISS_CODE: i32 = 404;

// ============================================================================
// Operations
// ============================================================================

const LOGIN: Operation = Operation::new("auth.login", "Issue a token for a user");
const WHO_AM_I: Operation = Operation::new("auth.me", "Claims of the presented token");
const CACHE_GET: Operation = Operation::new("cache.get", "Read a cached value");
const CACHE_PUT: Operation = Operation::new("cache.put", "Store a value in the cache");
const CACHE_DELETE: Operation = Operation::new("cache.delete", "Evict a cached value");
const LIVENESS: Operation = Operation::new("health.live", "Liveness probe");

/// Instrumented demo routes.
pub fn demo_operations() -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    registry.register(Method::POST, "/api/login", LOGIN);
    registry.register(Method::GET, "/api/me", WHO_AM_I);
    registry.register(Method::GET, "/api/cache/:key", CACHE_GET);
    registry.register(Method::PUT, "/api/cache/:key", CACHE_PUT);
    registry.register(Method::DELETE, "/api/cache/:key", CACHE_DELETE);
    registry.register(Method::GET, "/health/live", LIVENESS);
    registry
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to issue a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Subject of the token.
    pub username: String,
    /// Roles embedded as a claim.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Token lifetime; the configured default when absent.
    pub ttl_secs: Option<u64>,
}

/// Issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Compact JWT.
    pub token: String,
    /// Value for the `Authorization` header.
    pub authorization: String,
}

/// Claims of the caller's token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    /// Private claims.
    pub claims: Map<String, Value>,
    /// Token expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request to store a cache value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePutRequest {
    /// Value to store.
    pub value: Value,
    /// Expiry in seconds; none or zero stores without expiry.
    pub ttl_secs: Option<u64>,
}

/// Outcome of a cache write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePutResponse {
    /// Whether the store accepted the value.
    pub stored: bool,
}

/// A cached value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheValueResponse {
    /// Cache key.
    pub key: String,
    /// Stored value.
    pub value: Value,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    /// Always `alive`.
    pub status: String,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Issue a token for a user.
async fn login_handler<S: CacheStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> HandlerResult<LoginResponse> {
    let Json(request) = payload?;

    if request.username.trim().is_empty() {
        return Err(ServiceError::FieldValidation(vec![FieldViolation::new(
            "username",
            "must not be blank",
        )]));
    }

    let mut claims = Map::new();
    claims.insert("username".to_string(), Value::String(request.username));
    claims.insert("roles".to_string(), serde_json::to_value(request.roles).unwrap_or_default());

    let token = match request.ttl_secs {
        Some(0) => return Err(ServiceError::ConstraintViolation("ttl_secs: must be positive".to_string())),
        Some(secs) => state.tokens.issue_with_ttl(claims, Duration::from_secs(secs))?,
        None => state.tokens.issue(claims)?,
    };

    Ok(ResponseEnvelope::success(LoginResponse {
        authorization: format!("{}{}", crate::token::TOKEN_PREFIX, token),
        token,
    }))
}

/// Claims of the presented token.
async fn who_am_i_handler(Authenticated(claims): Authenticated) -> HandlerResult<WhoAmIResponse> {
    Ok(ResponseEnvelope::success(WhoAmIResponse {
        expires_at: claims.expires_at,
        claims: claims.custom,
    }))
}

/// Read a cached value.
async fn cache_get_handler<S: CacheStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    _caller: Authenticated,
    key: Result<Path<String>, PathRejection>,
) -> HandlerResult<CacheValueResponse> {
    let Path(key) = key?;

    match state.cache.get_typed::<Value>(&key).await {
        Some(value) => Ok(ResponseEnvelope::success(CacheValueResponse { key, value })),
        None => Err(ServiceError::business(
            CACHE_MISS_CODE,
            format!("no cached value for {key}"),
        )),
    }
}

/// Store a cache value.
async fn cache_put_handler<S: CacheStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    _caller: Authenticated,
    key: Result<Path<String>, PathRejection>,
    payload: Result<Json<CachePutRequest>, JsonRejection>,
) -> HandlerResult<CachePutResponse> {
    let Path(key) = key?;
    let Json(request) = payload?;

    let stored = state
        .cache
        .put(&key, &request.value, request.ttl_secs.map(Duration::from_secs))
        .await;
    Ok(ResponseEnvelope::success(CachePutResponse { stored }))
}

/// Evict a cached value.
async fn cache_delete_handler<S: CacheStore + 'static>(
    State(state): State<Arc<ServiceState<S>>>,
    _caller: Authenticated,
    key: Result<Path<String>, PathRejection>,
) -> HandlerResult<EmptyList> {
    let Path(key) = key?;
    state.cache.delete(&[key]).await;
    Ok(ResponseEnvelope::success_empty())
}

/// Liveness probe endpoint.
///
/// Simple check that the service is running. Does NOT check the cache store.
async fn liveness_handler() -> ResponseEnvelope<LivenessResponse> {
    ResponseEnvelope::success(LivenessResponse {
        status: "alive".to_string(),
    })
}

// ============================================================================
// Router Construction
// ============================================================================

/// Wrap a router with panic conversion and the error boundary.
///
/// Use this for any router whose handlers return [`ServiceError`].
pub fn with_error_boundary(router: Router, policy: Arc<ErrorPolicyTable>) -> Router {
    router
        .layer(CatchPanicLayer::custom(panic_to_error))
        .layer(middleware::from_fn_with_state(policy, error_boundary))
}

/// Create the Axum router for the demo service.
pub fn create_router<S: CacheStore + 'static>(state: ServiceState<S>) -> Router {
    let state = Arc::new(state);
    let instrumentation = Instrumentation {
        recorder: Arc::clone(&state.recorder),
        operations: Arc::new(demo_operations()),
    };
    let policy = Arc::clone(&state.policy);

    let router = Router::new()
        // Authentication
        .route("/api/login", post(login_handler::<S>))
        .route("/api/me", get(who_am_i_handler))
        // Cache
        .route(
            "/api/cache/:key",
            get(cache_get_handler::<S>)
                .put(cache_put_handler::<S>)
                .delete(cache_delete_handler::<S>),
        )
        // Health
        .route("/health/live", get(liveness_handler))
        .route_layer(middleware::from_fn_with_state(instrumentation, record_execution))
        .with_state(state);

    with_error_boundary(router, policy).layer(middleware::from_fn(correlate_request))
}
