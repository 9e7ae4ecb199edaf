//! Uniform response envelope.
//!
//! Every boundary operation answers with a [`ResponseEnvelope`]:
//!
//! ```json
//! {"code": 200, "message": "success", "data": {"id": 7}}
//! ```
//!
//! ## Serialization Rules
//!
//! - `code` is caller-facing and independent of the transport status.
//! - `data` is omitted entirely when it is absent, JSON `null`, or an empty
//!   list. It is never emitted as an explicit `null`.
//! - List-shaped outcomes without a payload default to an empty list.
//!
//! Application code builds success envelopes only. Failure envelopes are
//! produced by [`ErrorPolicyTable::dispatch`](crate::policy::ErrorPolicyTable::dispatch)
//! from a typed [`ServiceError`](crate::error::ServiceError).

use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Status code carried by every success envelope.
pub const SUCCESS_CODE: i32 = 200;

/// Message carried by success envelopes built without one.
pub const SUCCESS_MESSAGE: &str = "success";

/// Payload type of envelopes that carry no data.
pub type EmptyList = Vec<Value>;

/// Immutable success/failure wrapper for a request outcome.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseEnvelope<T> {
    code: i32,
    message: String,
    #[serde(default)]
    data: Option<T>,
}

impl<T> ResponseEnvelope<T> {
    /// Successful outcome with a payload.
    pub fn success(data: T) -> Self {
        Self::success_with(SUCCESS_MESSAGE, data)
    }

    /// Successful outcome with a custom message and a payload.
    pub fn success_with(message: impl Into<String>, data: T) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Status code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Human-readable outcome description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Payload, if any.
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Consume the envelope and return its payload.
    pub fn into_data(self) -> Option<T> {
        self.data
    }

    /// Whether this envelope reports success.
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

impl ResponseEnvelope<EmptyList> {
    /// Successful outcome without data.
    pub fn success_empty() -> Self {
        Self::success(Vec::new())
    }

    /// Successful outcome with a message and no data.
    pub fn success_with_message(message: impl Into<String>) -> Self {
        Self::success_with(message, Vec::new())
    }

    /// Failed outcome.
    ///
    /// Crate-visible only: handlers fail by returning a `ServiceError`, and the
    /// error policy table is the one place that turns it into an envelope.
    pub(crate) fn fail(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(Vec::new()),
        }
    }
}

/// Whether a payload's JSON form counts as "no data".
fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

impl<T: Serialize> Serialize for ResponseEnvelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = match &self.data {
            Some(data) => Some(serde_json::to_value(data).map_err(S::Error::custom)?),
            None => None,
        };
        let payload = payload.filter(|value| !is_empty_payload(value));

        let len = if payload.is_some() { 3 } else { 2 };
        let mut state = serializer.serialize_struct("ResponseEnvelope", len)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        match payload {
            Some(value) => state.serialize_field("data", &value)?,
            None => state.skip_field("data")?,
        }
        state.end()
    }
}

#[cfg(feature = "service")]
impl<T: Serialize> axum::response::IntoResponse for ResponseEnvelope<T> {
    fn into_response(self) -> axum::response::Response {
        // The envelope code is caller-facing; transport status stays 200.
        (axum::http::StatusCode::OK, axum::Json(self)).into_response()
    }
}
