//! Bearer-token extractor.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::state::ServiceState;
use crate::error::ServiceError;
use crate::store::CacheStore;
use crate::token::{TokenClaims, AUTH_HEADER};

/// Claims of a validated `Authorization: Bearer …` token.
///
/// Rejects with a 401 business error; expired tokens are reported separately
/// from invalid ones.
#[derive(Debug, Clone)]
pub struct Authenticated(pub TokenClaims);

#[async_trait]
impl<S> FromRequestParts<Arc<ServiceState<S>>> for Authenticated
where
    S: CacheStore + 'static,
{
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServiceState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok());

        match state.tokens.validate_authorization(header) {
            Ok(claims) => Ok(Self(claims)),
            Err(e) => {
                tracing::debug!(expired = e.is_expired(), error = %e, "Rejected bearer token");
                Err(e.into())
            }
        }
    }
}
