//! Service state management.
//!
//! Contains the shared components handed to every handler and the registry of
//! instrumented operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::Method;

use crate::cache::CacheClient;
use crate::config::{CommonsConfig, ConfigError};
use crate::policy::ErrorPolicyTable;
use crate::recorder::{ExecutionRecorder, Operation};
use crate::store::CacheStore;
use crate::token::TokenService;

/// Registry of instrumented routes.
///
/// Maps `(method, route pattern)` to the statically declared [`Operation`]
/// recorded for it. Routes without an entry are not recorded.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<(String, String), Operation>,
}

impl OperationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the operation for a route pattern, e.g. `/api/cache/:key`.
    ///
    /// Returns the operation previously registered for the route, if any.
    pub fn register(&mut self, method: Method, route: &str, operation: Operation) -> Option<Operation> {
        self.operations
            .insert((method.as_str().to_string(), route.to_string()), operation)
    }

    /// Resolve the operation for a matched route.
    pub fn resolve(&self, method: &Method, route: &str) -> Option<&Operation> {
        self.operations
            .get(&(method.as_str().to_string(), route.to_string()))
    }

    /// All registered operations, ordered by method and route.
    pub fn list(&self) -> Vec<Operation> {
        self.operations.values().copied().collect()
    }

    /// Get the number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Shared service state.
///
/// Contains the token service, cache client, error policy and recorder. Every
/// component is built once at startup and shared read-only.
pub struct ServiceState<S: CacheStore> {
    /// Token issuance and validation.
    pub tokens: TokenService,
    /// Fail-open cache.
    pub cache: CacheClient<S>,
    /// Error dispatch table used by the boundary.
    pub policy: Arc<ErrorPolicyTable>,
    /// Handler call recorder.
    pub recorder: Arc<ExecutionRecorder>,
}

impl<S: CacheStore> ServiceState<S> {
    /// Create state with the standard error policy and default recorder.
    pub fn new(tokens: TokenService, store: S) -> Self {
        Self {
            tokens,
            cache: CacheClient::new(store),
            policy: Arc::new(ErrorPolicyTable::standard()),
            recorder: Arc::new(ExecutionRecorder::default()),
        }
    }

    /// Create state from loaded configuration.
    ///
    /// Falls back to the development secret when none is configured.
    pub fn from_config(config: &CommonsConfig, store: S) -> Result<Self, ConfigError> {
        if config.token.using_development_secret {
            tracing::warn!(
                "COMMONS_TOKEN_SECRET not set, using development secret. \
                 Set this for production!"
            );
        }

        let tokens = TokenService::new(config.token.signing_key()?).with_default_ttl(config.token.ttl);
        Ok(Self::new(tokens, store).with_recorder(ExecutionRecorder::from_config(&config.recorder)))
    }

    /// Replace the error policy.
    pub fn with_policy(mut self, policy: ErrorPolicyTable) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Replace the recorder.
    pub fn with_recorder(mut self, recorder: ExecutionRecorder) -> Self {
        self.recorder = Arc::new(recorder);
        self
    }
}

impl<S: CacheStore> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            cache: self.cache.clone(),
            policy: Arc::clone(&self.policy),
            recorder: Arc::clone(&self.recorder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    const LOGIN: Operation = Operation::new("auth.login", "Issue a token");

    #[test]
    fn test_operation_registry_register() {
        let mut registry = OperationRegistry::new();

        assert_eq!(registry.register(Method::POST, "/api/login", LOGIN), None);
        assert_eq!(registry.register(Method::POST, "/api/login", LOGIN), Some(LOGIN));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_operation_registry_resolve() {
        let mut registry = OperationRegistry::new();
        registry.register(Method::POST, "/api/login", LOGIN);

        assert_eq!(registry.resolve(&Method::POST, "/api/login"), Some(&LOGIN));
        assert_eq!(registry.resolve(&Method::GET, "/api/login"), None);
        assert_eq!(registry.resolve(&Method::POST, "/api/logout"), None);
    }

    #[test]
    fn test_state_from_default_config() {
        let state = ServiceState::from_config(&CommonsConfig::default(), InMemoryStore::new()).unwrap();

        assert_eq!(state.tokens.default_ttl(), Duration::from_secs(604_800));
        assert_eq!(state.recorder.slow_threshold(), Duration::from_millis(1000));
        assert_eq!(*state.policy, ErrorPolicyTable::standard());
    }

    #[test]
    fn test_state_clone_shares_components() {
        let state = ServiceState::from_config(&CommonsConfig::default(), InMemoryStore::new()).unwrap();
        let clone = state.clone();

        assert!(Arc::ptr_eq(&state.recorder, &clone.recorder));
        assert!(Arc::ptr_eq(state.cache.store(), clone.cache.store()));
    }
}
