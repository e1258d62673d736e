//! Integration tests for the request-signing protocol.

use query_gateway::auth::{
    now_ms, sign_payload, stable_stringify, verify_signature, MAX_TIMESTAMP_SKEW_MS,
};
use serde_json::json;

fn test_key() -> String {
    hex::encode([0x42u8; 32])
}

#[test]
fn test_stable_stringify_ignores_insertion_order() {
    let first: serde_json::Value = serde_json::from_str(
        r#"{"query":"SELECT 1","sessionId":"S","nested":{"b":2,"a":1}}"#,
    )
    .unwrap();
    let second: serde_json::Value = serde_json::from_str(
        r#"{"nested":{"a":1,"b":2},"sessionId":"S","query":"SELECT 1"}"#,
    )
    .unwrap();
    assert_eq!(stable_stringify(&first), stable_stringify(&second));
}

#[test]
fn test_stringify_equals_stringify_of_clone() {
    let payload = json!({"sessionId": "S", "query": "db.users.find({})", "limit": 10});
    assert_eq!(
        stable_stringify(&payload),
        stable_stringify(&payload.clone())
    );
}

#[test]
fn test_hmac_stable_across_key_order() {
    let key = test_key();
    let ts = 1_700_000_000_000i64;
    let a: serde_json::Value =
        serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
    let b: serde_json::Value =
        serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
    assert_eq!(
        sign_payload(&key, ts, &a).unwrap(),
        sign_payload(&key, ts, &b).unwrap()
    );
}

#[test]
fn test_server_accepts_correctly_signed_request() {
    let key = test_key();
    let payload = json!({"sessionId": "S", "query": "SELECT 1"});
    let now = now_ms();
    let signature = sign_payload(&key, now, &payload).unwrap();

    verify_signature(
        &key,
        Some(&now.to_string()),
        Some(&signature),
        &payload,
        now,
    )
    .unwrap();
}

#[test]
fn test_server_rejects_any_single_bit_change() {
    let key = test_key();
    let payload = json!({"sessionId": "S", "query": "SELECT 1"});
    let now = now_ms();
    let signature = sign_payload(&key, now, &payload).unwrap();

    // Modified payload
    let modified = json!({"sessionId": "S", "query": "SELECT 2"});
    assert!(verify_signature(
        &key,
        Some(&now.to_string()),
        Some(&signature),
        &modified,
        now
    )
    .is_err());

    // Modified timestamp
    assert!(verify_signature(
        &key,
        Some(&(now + 1).to_string()),
        Some(&signature),
        &payload,
        now
    )
    .is_err());

    // Modified signature
    let mut bytes = hex::decode(&signature).unwrap();
    bytes[16] ^= 0x80;
    assert!(verify_signature(
        &key,
        Some(&now.to_string()),
        Some(&hex::encode(bytes)),
        &payload,
        now
    )
    .is_err());
}

#[test]
fn test_skew_window_boundaries() {
    let key = test_key();
    let payload = json!({});
    let now = now_ms();

    // Just inside the window on both sides
    for ts in [now - MAX_TIMESTAMP_SKEW_MS, now + MAX_TIMESTAMP_SKEW_MS] {
        let signature = sign_payload(&key, ts, &payload).unwrap();
        verify_signature(&key, Some(&ts.to_string()), Some(&signature), &payload, now).unwrap();
    }

    // Just outside
    let stale = now - MAX_TIMESTAMP_SKEW_MS - 1;
    let signature = sign_payload(&key, stale, &payload).unwrap();
    assert!(verify_signature(
        &key,
        Some(&stale.to_string()),
        Some(&signature),
        &payload,
        now
    )
    .is_err());
}

#[test]
fn test_wrong_key_rejected() {
    let payload = json!({"q": 1});
    let now = now_ms();
    let signature = sign_payload(&test_key(), now, &payload).unwrap();
    let other_key = hex::encode([0x43u8; 32]);
    assert!(verify_signature(
        &other_key,
        Some(&now.to_string()),
        Some(&signature),
        &payload,
        now
    )
    .is_err());
}
