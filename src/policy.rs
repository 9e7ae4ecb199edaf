//! Exception policy table.
//!
//! Static, ordered dispatch from [`ErrorKind`] to a failure envelope. The
//! first matching entry wins; the standard table lists the most specific kinds
//! before the catch-all:
//!
//! | Kind | Code | Message | Log |
//! |------|------|---------|-----|
//! | `Business` | own | own | message |
//! | `RequestBinding` | 400 | own | message |
//! | `ConstraintViolation` | 400 | own | message |
//! | `FieldValidation` | 400 | `field message; ` per violation | message |
//! | `NullReference` | 500 | `internal server error` | full trace |
//! | `Unclassified` | 500 | own | full trace |
//!
//! Every dispatch logs before building the envelope. Null-reference detail is
//! logged server-side and never echoed to the client.

use crate::envelope::{EmptyList, ResponseEnvelope};
use crate::error::{join_violations, ErrorKind, ServiceError};

/// Code for request-shape failures.
pub const BAD_REQUEST: i32 = 400;

/// Code for server-side failures.
pub const INTERNAL_SERVER_ERROR: i32 = 500;

/// Client-facing message for faults whose detail must not leak.
pub const GENERIC_ERROR_MESSAGE: &str = "internal server error";

/// Where the envelope code comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusSource {
    /// The error's own code (business errors).
    Own,
    /// A fixed code.
    Fixed(i32),
}

/// Where the envelope message comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSource {
    /// The error's own message.
    Own,
    /// Field violations joined as `field message; `.
    FieldViolations,
    /// A fixed message.
    Fixed(String),
}

/// How much of the error is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDetail {
    /// The error message only.
    Message,
    /// The message plus the captured stack trace.
    FullTrace,
}

/// One row of the policy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicyEntry {
    /// Kind this row handles.
    pub kind: ErrorKind,
    /// Code source.
    pub status: StatusSource,
    /// Message source.
    pub message: MessageSource,
    /// Log detail.
    pub log: LogDetail,
}

impl ErrorPolicyEntry {
    /// Create a row.
    pub fn new(kind: ErrorKind, status: StatusSource, message: MessageSource, log: LogDetail) -> Self {
        Self {
            kind,
            status,
            message,
            log,
        }
    }
}

/// Ordered, read-only error policy.
///
/// Built once at startup and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicyTable {
    entries: Vec<ErrorPolicyEntry>,
}

impl Default for ErrorPolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl ErrorPolicyTable {
    /// The standard table.
    pub fn standard() -> Self {
        use ErrorKind::*;
        use LogDetail::*;

        Self::from_entries(vec![
            ErrorPolicyEntry::new(Business, StatusSource::Own, MessageSource::Own, Message),
            ErrorPolicyEntry::new(RequestBinding, StatusSource::Fixed(BAD_REQUEST), MessageSource::Own, Message),
            ErrorPolicyEntry::new(
                ConstraintViolation,
                StatusSource::Fixed(BAD_REQUEST),
                MessageSource::Own,
                Message,
            ),
            ErrorPolicyEntry::new(
                FieldValidation,
                StatusSource::Fixed(BAD_REQUEST),
                MessageSource::FieldViolations,
                Message,
            ),
            ErrorPolicyEntry::new(
                NullReference,
                StatusSource::Fixed(INTERNAL_SERVER_ERROR),
                MessageSource::Fixed(GENERIC_ERROR_MESSAGE.to_string()),
                FullTrace,
            ),
            ErrorPolicyEntry::new(
                Unclassified,
                StatusSource::Fixed(INTERNAL_SERVER_ERROR),
                MessageSource::Own,
                FullTrace,
            ),
        ])
    }

    /// A table with custom rows, matched in the given order.
    pub fn from_entries(entries: Vec<ErrorPolicyEntry>) -> Self {
        Self { entries }
    }

    /// Rows in match order.
    pub fn entries(&self) -> &[ErrorPolicyEntry] {
        &self.entries
    }

    /// First row handling `kind`.
    pub fn lookup(&self, kind: ErrorKind) -> Option<&ErrorPolicyEntry> {
        self.entries.iter().find(|entry| entry.kind == kind)
    }

    /// Log `error` and build its failure envelope.
    ///
    /// Errors whose kind has no row are treated as internal failures with the
    /// generic message.
    pub fn dispatch(&self, error: &ServiceError) -> ResponseEnvelope<EmptyList> {
        let kind = error.kind();
        let Some(entry) = self.lookup(kind) else {
            tracing::error!(
                target: "service_commons::policy",
                kind = %kind,
                error = %error,
                trace = error.trace().unwrap_or_default(),
                "No error policy for kind, answering with generic failure"
            );
            return ResponseEnvelope::fail(INTERNAL_SERVER_ERROR, GENERIC_ERROR_MESSAGE);
        };

        let code = match entry.status {
            StatusSource::Own => error.own_code().unwrap_or(INTERNAL_SERVER_ERROR),
            StatusSource::Fixed(code) => code,
        };
        let message = match &entry.message {
            MessageSource::Own => error.to_string(),
            MessageSource::FieldViolations => match error {
                ServiceError::FieldValidation(violations) => join_violations(violations),
                other => other.to_string(),
            },
            MessageSource::Fixed(message) => message.clone(),
        };

        match entry.log {
            LogDetail::Message => {
                tracing::error!(
                    target: "service_commons::policy",
                    kind = %kind,
                    code,
                    "{error}"
                );
            }
            LogDetail::FullTrace => {
                tracing::error!(
                    target: "service_commons::policy",
                    kind = %kind,
                    code,
                    trace = error.trace().unwrap_or_default(),
                    "{error}"
                );
            }
        }

        ResponseEnvelope::fail(code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BizError, FieldViolation};

    #[test]
    fn test_standard_order() {
        let kinds: Vec<ErrorKind> = ErrorPolicyTable::standard().entries().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::Business,
                ErrorKind::RequestBinding,
                ErrorKind::ConstraintViolation,
                ErrorKind::FieldValidation,
                ErrorKind::NullReference,
                ErrorKind::Unclassified,
            ]
        );
    }

    #[test]
    fn test_business_error_keeps_code_and_message() {
        let envelope = ErrorPolicyTable::standard().dispatch(&BizError::new(4001, "X").into());
        assert_eq!(envelope.code(), 4001);
        assert_eq!(envelope.message(), "X");
        assert_eq!(serde_json::to_string(&envelope).unwrap(), r#"{"code":4001,"message":"X"}"#);
    }

    #[test]
    fn test_field_validation_message() {
        let error = ServiceError::FieldValidation(vec![
            FieldViolation::new("age", "must be positive"),
            FieldViolation::new("name", "must not be blank"),
        ]);
        let envelope = ErrorPolicyTable::standard().dispatch(&error);
        assert_eq!(envelope.code(), 400);
        assert_eq!(envelope.message(), "age must be positive; name must not be blank; ");
    }

    #[test]
    fn test_binding_and_constraint_are_400() {
        let table = ErrorPolicyTable::standard();

        let binding = table.dispatch(&ServiceError::RequestBinding("missing parameter 'id'".into()));
        assert_eq!((binding.code(), binding.message()), (400, "missing parameter 'id'"));

        let constraint = table.dispatch(&ServiceError::ConstraintViolation("name: must not be blank".into()));
        assert_eq!((constraint.code(), constraint.message()), (400, "name: must not be blank"));
    }

    #[test]
    fn test_null_reference_is_generic() {
        let envelope = ErrorPolicyTable::standard().dispatch(&ServiceError::null_reference("session.user was None"));
        assert_eq!(envelope.code(), 500);
        assert_eq!(envelope.message(), GENERIC_ERROR_MESSAGE);
        assert!(!serde_json::to_string(&envelope).unwrap().contains("session.user"));
    }

    #[test]
    fn test_unclassified_echoes_message() {
        let error = ServiceError::unclassified(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let envelope = ErrorPolicyTable::standard().dispatch(&error);
        assert_eq!(envelope.code(), 500);
        assert_eq!(envelope.message(), "disk full");
        assert_eq!(envelope.data(), Some(&Vec::new()));
    }

    #[test]
    fn test_first_match_wins() {
        let table = ErrorPolicyTable::from_entries(vec![
            ErrorPolicyEntry::new(
                ErrorKind::Business,
                StatusSource::Fixed(409),
                MessageSource::Fixed("conflict".into()),
                LogDetail::Message,
            ),
            ErrorPolicyEntry::new(ErrorKind::Business, StatusSource::Own, MessageSource::Own, LogDetail::Message),
        ]);
        let envelope = table.dispatch(&ServiceError::business(4001, "X"));
        assert_eq!((envelope.code(), envelope.message()), (409, "conflict"));
    }

    #[test]
    fn test_missing_row_falls_back_to_generic() {
        let table = ErrorPolicyTable::from_entries(Vec::new());
        let envelope = table.dispatch(&ServiceError::business(4001, "X"));
        assert_eq!((envelope.code(), envelope.message()), (500, GENERIC_ERROR_MESSAGE));
    }
}
