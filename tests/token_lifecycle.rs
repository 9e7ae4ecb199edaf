//! Token lifecycle tests.
//!
//! Issue → validate round trips, expiry boundaries under a simulated clock,
//! and tamper detection.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use service_commons::{
    CommonsConfig, ManualClock, SigningKey, TokenError, TokenService, AUTH_HEADER, TOKEN_PREFIX,
};

const ISSUED_AT: i64 = 1_700_000_000;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn service_with_clock() -> (TokenService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_unix(ISSUED_AT));
    let key = CommonsConfig::default().token.signing_key().unwrap();
    (TokenService::new(key).with_clock(clock.clone()), clock)
}

fn user_claims() -> Map<String, Value> {
    let mut claims = Map::new();
    claims.insert("userId".into(), json!(42));
    claims.insert("username".into(), json!("ann"));
    claims.insert("roles".into(), json!(["admin", "ops"]));
    claims
}

/// Replace the character at `index` with a different base64url character.
fn flip_char(token: &str, index: usize) -> String {
    let mut chars: Vec<char> = token.chars().collect();
    chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
    chars.into_iter().collect()
}

fn claim_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,24}".prop_map(Value::from),
        prop::collection::vec("[a-z]{1,8}", 0..4).prop_map(|v| json!(v)),
    ]
}

fn claims_map() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-zA-Z][a-zA-Z0-9_]{0,11}", claim_value(), 0..8).prop_map(|entries| {
        entries
            .into_iter()
            .filter(|(k, _)| !matches!(k.as_str(), "jti" | "iat" | "exp"))
            .collect()
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_issue_validate_with_bearer_prefix() {
    let (tokens, _) = service_with_clock();
    let token = tokens.issue(user_claims()).unwrap();

    let header = format!("{TOKEN_PREFIX}{token}");
    let claims = tokens.validate_authorization(Some(&header)).unwrap();

    assert_eq!(AUTH_HEADER, "Authorization");
    assert_eq!(claims.custom, user_claims());
    assert_eq!(claims.token_id.as_deref(), Some("tokenId"));
    assert_eq!(claims.issued_at.unwrap().timestamp(), ISSUED_AT);
    assert_eq!(claims.expires_at.unwrap().timestamp(), ISSUED_AT + 7 * 24 * 3600);
}

#[test]
fn test_default_ttl_is_seven_days() {
    let (tokens, clock) = service_with_clock();
    let token = tokens.issue(user_claims()).unwrap();

    clock.advance(chrono::Duration::days(7) - chrono::Duration::seconds(1));
    assert!(tokens.validate(&token).is_ok());

    clock.advance(chrono::Duration::seconds(1));
    assert!(tokens.validate(&token).unwrap_err().is_expired());
    assert_eq!(tokens.is_expired(&token), Ok(true));
}

#[test]
fn test_typed_claims_round_trip() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        user_id: u64,
        tenant: String,
    }

    let (tokens, _) = service_with_clock();
    let session = Session {
        user_id: 9,
        tenant: "acme".into(),
    };
    let token = tokens.issue_claims(&session, Duration::from_secs(60)).unwrap();

    let claims = tokens.validate(&token).unwrap();
    assert_eq!(claims.custom_as::<Session>().unwrap(), session);
}

#[test]
fn test_missing_header() {
    let (tokens, _) = service_with_clock();
    assert_eq!(tokens.validate_authorization(None), Err(TokenError::Missing));
    assert_eq!(tokens.validate_authorization(Some("  ")), Err(TokenError::Missing));
}

#[test]
fn test_other_key_rejects() {
    let (tokens, _) = service_with_clock();
    let token = tokens.issue(user_claims()).unwrap();

    let other = TokenService::new(SigningKey::from_bytes(b"a-completely-different-key").unwrap());
    assert_eq!(other.validate(&token), Err(TokenError::SignatureInvalid));
    assert_eq!(other.is_expired(&token), Err(TokenError::SignatureInvalid));
}

#[test]
fn test_unsigned_and_foreign_algorithms_unsupported() {
    let (tokens, _) = service_with_clock();
    let token = tokens.issue(user_claims()).unwrap();
    let mut parts = token.split('.');
    let (_, claims, signature) = (parts.next().unwrap(), parts.next().unwrap(), parts.next().unwrap());

    let unsigned = format!("eyJhbGciOiJub25lIn0.{claims}.");
    assert!(matches!(tokens.validate(&unsigned), Err(TokenError::Unsupported(_))));

    // {"alg":"HS256"}
    let hs256 = format!("eyJhbGciOiJIUzI1NiJ9.{claims}.{signature}");
    assert!(matches!(tokens.validate(&hs256), Err(TokenError::Unsupported(_))));
}

#[test]
fn test_tampered_claims_rejected() {
    let (tokens, _) = service_with_clock();
    let token = tokens.issue(user_claims()).unwrap();

    let mut forged = user_claims();
    forged.insert("roles".into(), json!(["root"]));
    let forged_b64 = {
        use base64::Engine;
        let mut payload = forged;
        payload.insert("exp".into(), json!(ISSUED_AT + 3600));
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap())
    };
    let mut parts: Vec<&str> = token.split('.').collect();
    parts[1] = &forged_b64;

    assert_eq!(tokens.validate(&parts.join(".")), Err(TokenError::SignatureInvalid));
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_round_trip_returns_claims_unchanged(claims in claims_map(), ttl_secs in 1u64..10_000_000) {
        let (tokens, _) = service_with_clock();
        let token = tokens.issue_with_ttl(claims.clone(), Duration::from_secs(ttl_secs)).unwrap();

        let validated = tokens.validate(&token).unwrap();
        prop_assert_eq!(validated.custom, claims);
    }

    #[test]
    fn prop_expiry_boundary(ttl_secs in 1i64..1_000_000, before in 1i64..1_000) {
        let (tokens, clock) = service_with_clock();
        let token = tokens.issue_with_ttl(user_claims(), Duration::from_secs(ttl_secs as u64)).unwrap();

        let before = before.min(ttl_secs);
        clock.advance(chrono::Duration::seconds(ttl_secs - before));
        prop_assert!(tokens.validate(&token).is_ok());

        clock.advance(chrono::Duration::seconds(before));
        let expired = tokens.validate(&token);
        prop_assert!(
            matches!(expired, Err(TokenError::Expired { expired_at }) if expired_at.timestamp() == ISSUED_AT + ttl_secs),
            "expected Expired at ISSUED_AT + ttl_secs, got {:?}", expired
        );
    }

    #[test]
    fn prop_expiry_boundary_millis(offset_ms in 0i64..1000, ttl_ms in 1i64..10_000_000, before_ms in 1i64..5_000) {
        let start_ms = ISSUED_AT * 1000 + offset_ms;
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp_millis(start_ms).unwrap()));
        let key = CommonsConfig::default().token.signing_key().unwrap();
        let tokens = TokenService::new(key).with_clock(clock.clone());
        let token = tokens.issue_with_ttl(user_claims(), Duration::from_millis(ttl_ms as u64)).unwrap();
        prop_assert!(tokens.validate(&token).is_ok());

        let before_ms = before_ms.min(ttl_ms);
        clock.advance(chrono::Duration::milliseconds(ttl_ms - before_ms));
        prop_assert!(tokens.validate(&token).is_ok());

        clock.advance(chrono::Duration::milliseconds(before_ms));
        let expired = tokens.validate(&token);
        prop_assert!(
            matches!(expired, Err(TokenError::Expired { expired_at }) if expired_at.timestamp_millis() == start_ms + ttl_ms),
            "ttl {}ms from {}ms gave {:?}", ttl_ms, start_ms, expired
        );
    }

    #[test]
    fn prop_tampering_never_validates(offset in any::<prop::sample::Index>()) {
        let (tokens, _) = service_with_clock();
        let token = tokens.issue(user_claims()).unwrap();

        // Any position after the header: claims, separator excluded, or signature.
        let header_len = token.find('.').unwrap() + 1;
        let candidates: Vec<usize> = (header_len..token.len())
            .filter(|&i| token.as_bytes()[i] != b'.')
            .collect();
        let index = candidates[offset.index(candidates.len())];

        let result = tokens.validate(&flip_char(&token, index));
        prop_assert!(
            matches!(result, Err(TokenError::SignatureInvalid) | Err(TokenError::Malformed(_))),
            "tampered token at {} gave {:?}", index, result
        );
    }
}
