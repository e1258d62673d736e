//! Request signing for the query gateway.
//!
//! Every authenticated request carries `x-timestamp` (epoch milliseconds) and
//! `x-signature` (hex HMAC-SHA256 over `<timestamp>.<canonical payload>`).
//! The canonical payload is stable JSON: object keys sorted lexicographically
//! at every nesting level, so client and server produce identical bytes
//! regardless of key insertion order.

use hmac::{Hmac, Mac};
use serde_json::Value as JsonValue;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{GatewayError, GatewayResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed clock skew between client and server.
pub const MAX_TIMESTAMP_SKEW_MS: i64 = 5 * 60 * 1000;

/// Serialize a JSON value deterministically.
///
/// Object keys are sorted at every depth; arrays preserve order; primitives
/// use canonical JSON form.
pub fn stable_stringify(value: &JsonValue) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serializes"));
                out.push(':');
                write_stable(&map[key.as_str()], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        scalar => {
            out.push_str(&serde_json::to_string(scalar).expect("scalar serializes"));
        }
    }
}

/// Compute the hex signature for a payload at a given timestamp.
pub fn sign_payload(signing_key_hex: &str, timestamp_ms: i64, payload: &JsonValue) -> GatewayResult<String> {
    let key = hex::decode(signing_key_hex)
        .map_err(|_| GatewayError::unauthorized("Invalid signing key encoding"))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|_| GatewayError::unauthorized("Invalid signing key length"))?;
    mac.update(format!("{}.{}", timestamp_ms, stable_stringify(payload)).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a request signature against a session signing key.
///
/// Rejects missing headers, timestamps outside the skew window, and
/// signatures that fail the constant-time MAC comparison.
pub fn verify_signature(
    signing_key_hex: &str,
    timestamp_header: Option<&str>,
    signature_header: Option<&str>,
    payload: &JsonValue,
    now_ms: i64,
) -> GatewayResult<()> {
    let timestamp = timestamp_header
        .ok_or_else(|| GatewayError::unauthorized("Missing x-timestamp header"))?;
    let signature = signature_header
        .ok_or_else(|| GatewayError::unauthorized("Missing x-signature header"))?;

    let timestamp_ms: i64 = timestamp
        .parse()
        .map_err(|_| GatewayError::unauthorized("Invalid x-timestamp header"))?;
    if (now_ms - timestamp_ms).abs() > MAX_TIMESTAMP_SKEW_MS {
        return Err(GatewayError::unauthorized(
            "Request timestamp outside the allowed window",
        ));
    }

    let key = hex::decode(signing_key_hex)
        .map_err(|_| GatewayError::unauthorized("Invalid signing key encoding"))?;
    let expected = hex::decode(signature)
        .map_err(|_| GatewayError::unauthorized("Invalid x-signature header"))?;

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|_| GatewayError::unauthorized("Invalid signing key length"))?;
    mac.update(format!("{}.{}", timestamp_ms, stable_stringify(payload)).as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| GatewayError::unauthorized("Invalid request signature"))
}

/// Constant-time comparison for shared secrets (admin token, extend code).
pub fn verify_shared_secret(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
