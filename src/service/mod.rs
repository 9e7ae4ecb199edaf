//! Axum integration and demo service.
//!
//! Wires the shared components into a router: handlers return
//! `Result<ResponseEnvelope<T>, ServiceError>`, registered routes are timed by
//! the execution recorder, and one error boundary dispatches every failure.
//!
//! ## Endpoints
//!
//! - `POST /api/login` - Issue a token for a user
//! - `GET /api/me` - Claims of the presented bearer token
//! - `GET /api/cache/:key` - Read a cached value
//! - `PUT /api/cache/:key` - Store a value (fail-open)
//! - `DELETE /api/cache/:key` - Evict a value
//! - `GET /health/live` - Liveness probe

pub mod auth;
pub mod middleware;
pub mod routes;
pub mod state;

pub use auth::Authenticated;
pub use middleware::{
    correlate_request, error_boundary, panic_to_error, record_execution, Instrumentation, RequestId,
    REQUEST_ID_HEADER,
};
pub use routes::{create_router, demo_operations, with_error_boundary, HandlerResult};
#[cfg(feature = "redis")]
pub use routes::AppState;
pub use state::{OperationRegistry, ServiceState};
