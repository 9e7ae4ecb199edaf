//! Service middleware for error dispatch and call recording.
//!
//! ## Layer Order
//!
//! ```text
//! correlate_request → error_boundary → CatchPanicLayer → record_execution (per route) → handler
//! ```
//!
//! Handler errors and extractor rejections leave the handler as a
//! placeholder response carrying the [`ServiceError`]. [`error_boundary`] is the
//! single place they are turned into envelopes. Panics are converted into
//! null-reference errors before they reach it.
//!
//! There is no separate access log: every registered call is recorded inside
//! the request span, and the record carries the request id as its last argument.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{info_span, Instrument};

use super::state::OperationRegistry;
use crate::error::{PendingError, ServiceError};
use crate::policy::ErrorPolicyTable;
use crate::recorder::{CallArgs, ExecutionRecorder, Outcome};

/// Header carrying the correlation id, read from the caller and echoed back.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Tag each request with a correlation id and run it inside a `request` span.
///
/// A caller-supplied `X-Request-Id` is kept; otherwise a v4 UUID is assigned.
pub async fn correlate_request(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Dispatch any handler error through the policy table.
///
/// Responses without a pending error pass through unchanged.
pub async fn error_boundary(
    State(policy): State<Arc<ErrorPolicyTable>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    match response.extensions_mut().remove::<PendingError>() {
        Some(PendingError(error)) => policy.dispatch(&error).into_response(),
        None => response,
    }
}

/// Convert a handler panic into a null-reference error.
pub fn panic_to_error(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    };
    ServiceError::null_reference(detail).into_response()
}

/// Recorder and the routes it instruments.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    /// Recorder shared with the service state.
    pub recorder: Arc<ExecutionRecorder>,
    /// Instrumented routes.
    pub operations: Arc<OperationRegistry>,
}

/// Record registered routes with the execution recorder.
///
/// Must be installed with `route_layer` so the matched route is known. A call
/// whose response carries a pending error is recorded as failed.
pub async fn record_execution(
    State(instrumentation): State<Instrumentation>,
    request: Request,
    next: Next,
) -> Response {
    let operation = request
        .extensions()
        .get::<MatchedPath>()
        .and_then(|path| {
            instrumentation
                .operations
                .resolve(request.method(), path.as_str())
        })
        .copied();
    let Some(operation) = operation else {
        return next.run(request).await;
    };

    let caller = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let request_id = request.extensions().get::<RequestId>().map(|id| id.0.as_str());
    let args = CallArgs::new()
        .arg(request.method())
        .arg(request.uri())
        .opt_arg(request_id);

    let recorder = &instrumentation.recorder;
    let timer = recorder.start();
    let response = next.run(request).await;

    let outcome = if response.extensions().get::<PendingError>().is_some() {
        Outcome::Failed
    } else {
        Outcome::Completed
    };
    recorder.finish(&operation, &args, caller, &timer, outcome);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_panic_to_error_carries_pending_error() {
        let response = panic_to_error(Box::new("index out of bounds"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let pending = response.extensions().get::<PendingError>().unwrap();
        assert!(matches!(
            pending.0.as_ref(),
            ServiceError::NullReference { detail, .. } if detail == "index out of bounds"
        ));
    }

    #[test]
    fn test_panic_to_error_non_string_payload() {
        let response = panic_to_error(Box::new(42_u8));
        let pending = response.extensions().get::<PendingError>().unwrap();
        assert!(pending.0.to_string().contains("handler panicked"));
    }
}
