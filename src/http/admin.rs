//! Admin endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::json;

use crate::auth::verify_shared_secret;
use crate::config::AdapterSettings;
use crate::error::GatewayError;
use crate::http::{header_str, ok_json, ApiResult, AppState};
use crate::scheduler::run_cleanup;

/// `POST /admin/cleanup` - run the tenant cleanup routine on demand.
///
/// Gated by `x-admin-token` compared in constant time. 503 when the
/// deployment has no token configured.
pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let expected = state
        .config
        .admin_cleanup_token
        .as_deref()
        .ok_or_else(|| GatewayError::unavailable("Admin cleanup is not configured"))?;
    let provided = header_str(&headers, "x-admin-token")
        .ok_or_else(|| GatewayError::unauthorized("Missing x-admin-token header"))?;
    if !verify_shared_secret(provided, expected) {
        return Err(GatewayError::unauthorized("Invalid admin token").into());
    }

    let outcomes = run_cleanup(&state.defaults, AdapterSettings::from_config(&state.config)).await;

    let mut fields = serde_json::Map::new();
    fields.insert("outcomes".into(), json!(outcomes));
    Ok(ok_json(fields))
}
