//! Service error taxonomy.
//!
//! Every handler error is a [`ServiceError`]. It propagates unmodified up to
//! the HTTP boundary, where [`ErrorPolicyTable`](crate::policy::ErrorPolicyTable)
//! turns it into a [`ResponseEnvelope`](crate::envelope::ResponseEnvelope).
//! Application code never builds failure envelopes itself.
//!
//! ## Kinds
//!
//! | Kind | Raised for |
//! |------|------------|
//! | `Business` | expected rule violations with a caller-facing code |
//! | `RequestBinding` | missing or unparseable request parameters and bodies |
//! | `ConstraintViolation` | a single parameter failing a constraint |
//! | `FieldValidation` | a bound form or body failing on one or more fields |
//! | `NullReference` | a required value that was absent, or a handler panic |
//! | `Unclassified` | anything else |

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use crate::token::TokenError;

/// Boxed error carried by [`ServiceError::Unclassified`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Discriminant of [`ServiceError`], used as the policy table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Business rule violation.
    Business,
    /// Missing or invalid bound request parameter.
    RequestBinding,
    /// Single-field constraint violation.
    ConstraintViolation,
    /// Bulk field-validation failure.
    FieldValidation,
    /// Null-reference fault.
    NullReference,
    /// Any other error.
    Unclassified,
}

impl ErrorKind {
    /// Stable name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Business => "business",
            Self::RequestBinding => "request_binding",
            Self::ConstraintViolation => "constraint_violation",
            Self::FieldValidation => "field_validation",
            Self::NullReference => "null_reference",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business error catalog entry.
///
/// Implemented by service-specific enums so call sites raise
/// `BizError::from_code(&OrderError::OutOfStock)` instead of repeating codes.
pub trait BizErrorCode {
    /// Caller-facing code.
    fn code(&self) -> i32;

    /// Caller-facing message.
    fn message(&self) -> &str;
}

/// Expected business rule violation carrying its own code and message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BizError {
    /// Caller-facing code.
    pub code: i32,
    /// Caller-facing message.
    pub message: String,
}

impl BizError {
    /// Create a business error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a business error from a catalog entry.
    pub fn from_code<C: BizErrorCode + ?Sized>(entry: &C) -> Self {
        Self::new(entry.code(), entry.message())
    }
}

/// One failed field of a validated form or body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Field name.
    pub field: String,
    /// Validator message, e.g. `must not be blank`.
    pub message: String,
}

impl FieldViolation {
    /// Create a violation.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Join violations as `field message; ` in order.
pub fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{} {}; ", v.field, v.message))
        .collect()
}

/// Error returned by request handlers.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Business rule violation.
    #[error(transparent)]
    Business(#[from] BizError),

    /// Missing or invalid bound request parameter.
    #[error("{0}")]
    RequestBinding(String),

    /// Single-field constraint violation.
    #[error("{0}")]
    ConstraintViolation(String),

    /// Bulk field-validation failure.
    #[error("{}", join_violations(.0))]
    FieldValidation(Vec<FieldViolation>),

    /// A required value was absent.
    #[error("null reference: {detail}")]
    NullReference {
        /// Server-side detail; never sent to the client.
        detail: String,
        /// Stack trace captured at construction.
        trace: String,
    },

    /// Any other error.
    #[error("{source}")]
    Unclassified {
        /// Underlying error.
        source: BoxError,
        /// Stack trace captured at construction.
        trace: String,
    },
}

impl ServiceError {
    /// Business error with an explicit code.
    pub fn business(code: i32, message: impl Into<String>) -> Self {
        Self::Business(BizError::new(code, message))
    }

    /// Null-reference fault, capturing the current stack.
    pub fn null_reference(detail: impl Into<String>) -> Self {
        Self::NullReference {
            detail: detail.into(),
            trace: Backtrace::capture().to_string(),
        }
    }

    /// Unclassified error, capturing the current stack.
    pub fn unclassified(source: impl Into<BoxError>) -> Self {
        Self::Unclassified {
            source: source.into(),
            trace: Backtrace::capture().to_string(),
        }
    }

    /// The policy table key for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Business(_) => ErrorKind::Business,
            Self::RequestBinding(_) => ErrorKind::RequestBinding,
            Self::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            Self::FieldValidation(_) => ErrorKind::FieldValidation,
            Self::NullReference { .. } => ErrorKind::NullReference,
            Self::Unclassified { .. } => ErrorKind::Unclassified,
        }
    }

    /// Code carried by the error itself, if any.
    pub fn own_code(&self) -> Option<i32> {
        match self {
            Self::Business(e) => Some(e.code),
            _ => None,
        }
    }

    /// Captured stack trace, for kinds that record one.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::NullReference { trace, .. } | Self::Unclassified { trace, .. } => Some(trace),
            _ => None,
        }
    }
}

/// Authentication failures surface as business errors.
///
/// Expired tokens get their own message so clients can prompt a re-login.
impl From<TokenError> for ServiceError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Missing => Self::business(401, "missing authorization token"),
            TokenError::Expired { .. } => Self::business(401, "token expired"),
            TokenError::Issue(reason) => Self::unclassified(reason),
            other => Self::business(401, format!("invalid token: {other}")),
        }
    }
}

#[cfg(feature = "service")]
mod http {
    use std::sync::Arc;

    use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};

    use super::ServiceError;

    /// Error parked in response extensions until the boundary dispatches it.
    #[derive(Debug, Clone)]
    pub(crate) struct PendingError(pub(crate) Arc<ServiceError>);

    impl From<JsonRejection> for ServiceError {
        fn from(rejection: JsonRejection) -> Self {
            Self::RequestBinding(rejection.body_text())
        }
    }

    impl From<QueryRejection> for ServiceError {
        fn from(rejection: QueryRejection) -> Self {
            Self::RequestBinding(rejection.body_text())
        }
    }

    impl From<PathRejection> for ServiceError {
        fn from(rejection: PathRejection) -> Self {
            Self::RequestBinding(rejection.body_text())
        }
    }

    /// The error is not rendered here; `error_boundary` replaces this
    /// placeholder with the dispatched envelope.
    impl IntoResponse for ServiceError {
        fn into_response(self) -> Response {
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            response.extensions_mut().insert(PendingError(Arc::new(self)));
            response
        }
    }
}

#[cfg(feature = "service")]
pub(crate) use http::PendingError;
