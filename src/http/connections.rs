//! Connection lifecycle endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::auth::verify_shared_secret;
use crate::config::AdapterSettings;
use crate::db::Adapter;
use crate::error::GatewayError;
use crate::http::{
    authorize_signed, from_payload, header_str, ok_json, ApiResult, AppState,
};
use crate::models::DatabaseKind;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestRequest {
    kind: DatabaseKind,
    connection_url: String,
}

/// `POST /connections/test` - connect briefly and report the server version.
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<JsonValue>,
) -> ApiResult<Response> {
    let request: TestRequest = from_payload(payload)?;
    if !request.kind.accepts_url(&request.connection_url) {
        return Err(GatewayError::client_input(format!(
            "Connection URL does not match the {} scheme",
            request.kind.display_name()
        ))
        .into());
    }

    let adapter = Adapter::new(
        request.kind,
        AdapterSettings::from_config(&state.config),
        false,
    );
    adapter.connect(&request.connection_url).await?;
    let server_version = adapter.server_version().await?;
    adapter.disconnect().await;

    let mut fields = serde_json::Map::new();
    fields.insert("kind".into(), json!(request.kind));
    fields.insert("serverVersion".into(), json!(server_version));
    Ok(ok_json(fields))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    kind: DatabaseKind,
    connection_url: Option<String>,
    user_id: Option<String>,
    #[serde(default)]
    is_isolated: bool,
    #[serde(default)]
    use_default_database: bool,
}

/// `POST /connections/connect` - open a session.
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<JsonValue>,
) -> ApiResult<Response> {
    let request: ConnectRequest = from_payload(payload)?;

    let (connection_url, is_default) = if request.use_default_database {
        let config = state
            .defaults
            .iter()
            .find(|d| d.kind == request.kind)
            .ok_or_else(|| {
                GatewayError::client_input(format!(
                    "No default {} connection is configured",
                    request.kind.display_name()
                ))
            })?;
        (config.url.clone(), true)
    } else {
        let url = request
            .connection_url
            .clone()
            .ok_or_else(|| GatewayError::client_input("Missing connectionUrl"))?;
        let is_default = state.defaults.iter().any(|d| d.url == url);
        (url, is_default)
    };

    let created = state
        .sessions
        .create_session(
            request.kind,
            &connection_url,
            request.user_id,
            request.is_isolated,
            is_default,
        )
        .await?;

    let mut fields = serde_json::Map::new();
    fields.insert("sessionId".into(), json!(created.session_id));
    fields.insert("serverVersion".into(), json!(created.server_version));
    fields.insert("signingKey".into(), json!(created.signing_key));
    if let Some(user_database) = created.user_database {
        fields.insert("userDatabase".into(), json!(user_database));
    }
    Ok(ok_json(fields))
}

/// `POST /connections/disconnect` - close a session.
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> ApiResult<Response> {
    let session = authorize_signed(&state, &headers, &payload).await?;
    state.sessions.close_session(&session.id).await;
    Ok(ok_json(serde_json::Map::new()))
}

/// `POST /connections/keepalive` - touch the activity timestamp.
pub async fn keepalive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> ApiResult<Response> {
    // get_session inside authorize_signed already touched lastActivity.
    authorize_signed(&state, &headers, &payload).await?;
    let mut fields = serde_json::Map::new();
    fields.insert("lastActivity".into(), json!(crate::auth::now_ms()));
    Ok(ok_json(fields))
}

/// `POST /connections/session-extend` - flip `allowDestructive = true`.
///
/// Requires the signed session plus the shared extend code. 404 when the
/// deployment has no code configured.
pub async fn session_extend(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> ApiResult<Response> {
    let expected = state
        .config
        .app_extend_code
        .as_deref()
        .ok_or_else(|| GatewayError::not_found("Session extension is not available"))?;
    let provided = header_str(&headers, "x-request-code")
        .ok_or_else(|| GatewayError::unauthorized("Missing x-request-code header"))?;
    if !verify_shared_secret(provided, expected) {
        return Err(GatewayError::unauthorized("Invalid request code").into());
    }

    let session = authorize_signed(&state, &headers, &payload).await?;
    state
        .sessions
        .set_session_allow_destructive(&session.id, true)
        .await?;

    let mut fields = serde_json::Map::new();
    fields.insert("allowDestructive".into(), json!(true));
    Ok(ok_json(fields))
}

/// `GET /config/databases` - default connection options, no URLs.
pub async fn default_databases(State(state): State<Arc<AppState>>) -> Response {
    let databases: Vec<JsonValue> = state
        .defaults
        .iter()
        .map(|d| json!({ "kind": d.kind, "displayName": d.display_name }))
        .collect();
    let mut fields = serde_json::Map::new();
    fields.insert("databases".into(), JsonValue::Array(databases));
    ok_json(fields)
}
