//! Query execution, export and transaction endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::error::GatewayError;
use crate::http::{
    attachment_response, authorize_signed, from_payload, ok_json, ApiResult, AppState,
};
use crate::models::{DatabaseKind, QueryOptions};
use crate::query::{
    enforce_isolation, is_select_like, render_csv, render_json, split_statements, validate_query,
    ExportFormat, ValidationContext,
};
use crate::session::Session;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    #[allow(dead_code)]
    session_id: String,
    query: String,
    database: Option<String>,
    limit: Option<u32>,
    offset: Option<u64>,
    #[serde(default)]
    explain: bool,
}

/// `POST /query/execute` - run a SQL batch or one Mongo statement.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> ApiResult<Response> {
    let session = authorize_signed(&state, &headers, &payload).await?;
    let request: ExecuteRequest = from_payload(payload)?;

    validate(&state, &session, &request.query, request.database.as_deref())?;

    let options = QueryOptions {
        limit: request.limit,
        offset: request.offset,
        explain: request.explain,
        user_id: session.user_id.clone(),
        is_isolated: session.is_isolated,
        user_database: session.user_database.clone(),
        allow_destructive: session.allow_destructive(),
        unlimited: false,
    };

    let result = session
        .adapter
        .execute_query(&request.query, request.database.as_deref(), &options)
        .await?;

    let mut fields = serde_json::Map::new();
    fields.insert("result".into(), json!(result));
    Ok(ok_json(fields))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportRequest {
    #[allow(dead_code)]
    session_id: String,
    query: String,
    database: Option<String>,
    format: ExportFormat,
}

/// `POST /query/export` - stream one statement as CSV or JSON, without the
/// default row cap.
pub async fn export(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> ApiResult<Response> {
    let session = authorize_signed(&state, &headers, &payload).await?;
    let request: ExportRequest = from_payload(payload)?;

    if session.kind != DatabaseKind::MongoDb {
        let statements = split_statements(&request.query);
        if statements.len() != 1 {
            return Err(
                GatewayError::validation("Export accepts exactly one statement").into(),
            );
        }
        if !is_select_like(&statements[0]) {
            return Err(
                GatewayError::validation("Export accepts SELECT-like statements only").into(),
            );
        }
    }

    validate(&state, &session, &request.query, request.database.as_deref())?;

    let options = QueryOptions {
        user_id: session.user_id.clone(),
        is_isolated: session.is_isolated,
        user_database: session.user_database.clone(),
        allow_destructive: session.allow_destructive(),
        unlimited: true,
        ..Default::default()
    };

    let result = session
        .adapter
        .execute_query(&request.query, request.database.as_deref(), &options)
        .await?;

    let body = match request.format {
        ExportFormat::Csv => render_csv(&result),
        ExportFormat::Json => render_json(&result),
    };
    Ok(attachment_response(
        request.format.content_type(),
        request.format.file_name(),
        body,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TransactionAction {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest {
    #[allow(dead_code)]
    session_id: String,
    action: TransactionAction,
}

/// `POST /transaction` - begin/commit/rollback on the session's adapter.
pub async fn transaction(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> ApiResult<Response> {
    let session = authorize_signed(&state, &headers, &payload).await?;
    let request: TransactionRequest = from_payload(payload)?;

    match request.action {
        TransactionAction::Begin => session.adapter.begin_transaction().await?,
        TransactionAction::Commit => session.adapter.commit_transaction().await?,
        TransactionAction::Rollback => session.adapter.rollback_transaction().await?,
    }

    let mut fields = serde_json::Map::new();
    fields.insert(
        "transactionActive".into(),
        json!(session.adapter.is_transaction_active().await),
    );
    Ok(ok_json(fields))
}

/// Shared validation for execute and export: sanitizer policy plus the
/// isolation boundary for tenant SQL sessions.
fn validate(
    state: &AppState,
    session: &Session,
    query: &str,
    database: Option<&str>,
) -> Result<(), GatewayError> {
    let ctx = ValidationContext::new(session.kind, session.is_default_connection).with_limits(
        state.config.max_query_length,
        state.config.max_nested_depth,
    );
    validate_query(query, &ctx)?;

    if session.is_isolated {
        if let Some(user_database) = &session.user_database {
            if let Some(database) = database {
                if database != user_database {
                    return Err(GatewayError::forbidden(format!(
                        "Session is isolated to '{}'",
                        user_database
                    )));
                }
            }
            if session.kind == DatabaseKind::MySql {
                enforce_isolation(query, user_database, database)?;
            }
        }
    }
    Ok(())
}
