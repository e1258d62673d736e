//! HTTP surface of the gateway.
//!
//! Thin glue: every handler translates a request into calls on the session
//! manager, the validators and the adapters. Signing, rate limiting and the
//! security-header posture live here as middleware and shared helpers.

pub mod admin;
pub mod connections;
pub mod query;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use crate::auth::{now_ms, verify_signature};
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::models::DefaultDatabaseConfig;
use crate::rate_limit::{client_ip, RateLimitDecision, RateLimiter};
use crate::session::{Session, SessionManager};

/// Maximum accepted request body, in bytes.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionManager>,
    pub defaults: Arc<Vec<DefaultDatabaseConfig>>,
    pub query_limiter: RateLimiter,
    pub connection_limiter: RateLimiter,
}

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    let connection_routes = Router::new()
        .route("/connections/test", post(connections::test_connection))
        .route("/connections/connect", post(connections::connect))
        .route("/connections/disconnect", post(connections::disconnect))
        .route("/connections/keepalive", post(connections::keepalive))
        .route(
            "/connections/session-extend",
            post(connections::session_extend),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            connection_rate_limit,
        ));

    let query_routes = Router::new()
        .route("/query/execute", post(query::execute))
        .route("/query/export", post(query::export))
        .route("/transaction", post(query::transaction))
        .route("/schema/databases", get(schema::databases))
        .route("/schema/tables", get(schema::tables))
        .route("/schema/columns", get(schema::columns))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            query_rate_limit,
        ));

    Router::new()
        .merge(connection_routes)
        .merge(query_routes)
        .route("/config/databases", get(connections::default_databases))
        .route("/admin/cleanup", post(admin::cleanup))
        .layer(middleware::from_fn(security_headers))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Serve the router with graceful shutdown on SIGINT/SIGTERM. A second
/// signal, or a 30 second timeout, forces exit.
pub async fn serve(state: Arc<AppState>) -> GatewayResult<()> {
    let bind_addr = state.config.bind_addr();
    let app = router(state.clone());

    let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
        GatewayError::internal(format!("Failed to bind to {}: {}", bind_addr, e))
    })?;
    info!(addr = %bind_addr, "Gateway listening");

    let shutdown_notify = Arc::new(tokio::sync::Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();
    let shutdown_signal = async move {
        wait_for_signal().await;
        shutdown_notify_clone.notify_one();
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);
    const GRACEFUL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    tokio::select! {
        result = server => {
            match result {
                Ok(()) => info!("HTTP server stopped"),
                Err(e) => {
                    error!(error = %e, "HTTP server error");
                    return Err(GatewayError::internal(format!("HTTP server error: {}", e)));
                }
            }
        }
        _ = async {
            shutdown_notify.notified().await;
            info!(
                timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                "Waiting for connections to close (send signal again to force exit)..."
            );
            tokio::select! {
                _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                    warn!("Graceful shutdown timeout, forcing exit");
                }
                _ = wait_for_signal() => {
                    warn!("Received second signal, forcing immediate exit");
                }
            }
        } => {}
    }

    info!("Closing sessions");
    state.sessions.close_all().await;
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// =============================================================================
// Middleware
// =============================================================================

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; frame-ancestors 'none'"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

async fn connection_rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce_rate_limit(&state.connection_limiter, request, next).await
}

async fn query_rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce_rate_limit(&state.query_limiter, request, next).await
}

async fn enforce_rate_limit(limiter: &RateLimiter, request: Request, next: Next) -> Response {
    let ip = client_ip(request.headers());
    let decision = limiter.check(&ip).await;

    if !decision.allowed {
        let mut response = error_response(&GatewayError::RateLimited {
            retry_after_secs: decision.retry_after_secs.unwrap_or(1),
        });
        apply_rate_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_headers(response.headers_mut(), &decision);
    response
}

fn apply_rate_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let entries = [
        ("ratelimit-limit", decision.limit.to_string()),
        ("ratelimit-remaining", decision.remaining.to_string()),
        ("ratelimit-reset", decision.reset_epoch_secs.to_string()),
        ("ratelimit-policy", decision.policy()),
    ];
    for (name, value) in entries {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    if let Some(retry_after) = decision.retry_after_secs {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            headers.insert(header::RETRY_AFTER, value);
        }
    }
}

// =============================================================================
// Response & auth helpers
// =============================================================================

/// Render a gateway error as its `{success: false, error}` response.
pub fn error_response(error: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({ "success": false, "error": error.to_string() });
    (status, Json(body)).into_response()
}

/// Newtype so handlers can `?` gateway errors straight into responses.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(&self.0)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Standard success body: `{success: true, ...fields}`.
pub fn ok_json(mut fields: serde_json::Map<String, JsonValue>) -> Response {
    fields.insert("success".into(), JsonValue::Bool(true));
    Json(JsonValue::Object(fields)).into_response()
}

/// Resolve the session named by a payload and verify the request signature
/// over the canonical payload bytes.
pub async fn authorize_signed(
    state: &AppState,
    headers: &HeaderMap,
    payload: &JsonValue,
) -> GatewayResult<Arc<Session>> {
    let session_id = payload
        .get("sessionId")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| GatewayError::client_input("Missing sessionId"))?;
    let session = state
        .sessions
        .get_session(session_id)
        .await
        .ok_or_else(|| GatewayError::unauthorized("Unknown or expired session"))?;

    verify_signature(
        &session.signing_key,
        header_str(headers, "x-timestamp"),
        header_str(headers, "x-signature"),
        payload,
        now_ms(),
    )?;
    Ok(session)
}

/// Signature payload for GET endpoints: the query-string parameters as a
/// string-valued JSON object.
pub fn params_payload(params: &BTreeMap<String, String>) -> JsonValue {
    JsonValue::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect(),
    )
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Parse a JSON body into a typed request after signature verification.
pub fn from_payload<T: serde::de::DeserializeOwned>(payload: JsonValue) -> GatewayResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| GatewayError::client_input(format!("Invalid request body: {}", e)))
}

/// Build a plain-body response with explicit content type and disposition
/// (export path).
pub fn attachment_response(content_type: &str, file_name: &str, body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
