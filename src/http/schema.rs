//! Schema inspection endpoints.
//!
//! GET endpoints sign over the query-string parameter map rather than a
//! JSON body.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::json;

use crate::error::GatewayError;
use crate::http::{authorize_signed, ok_json, params_payload, ApiResult, AppState};

fn required<'a>(
    params: &'a BTreeMap<String, String>,
    name: &str,
) -> Result<&'a str, GatewayError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| GatewayError::client_input(format!("Missing {} parameter", name)))
}

/// `GET /schema/databases` - list schemas/databases visible to the session.
pub async fn databases(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let payload = params_payload(&params);
    let session = authorize_signed(&state, &headers, &payload).await?;

    let databases = session.adapter.get_databases().await?;
    let mut fields = serde_json::Map::new();
    fields.insert("databases".into(), json!(databases));
    Ok(ok_json(fields))
}

/// `GET /schema/tables` - list tables/collections in a database.
pub async fn tables(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let payload = params_payload(&params);
    let session = authorize_signed(&state, &headers, &payload).await?;
    let database = required(&params, "database")?;

    let tables = session.adapter.get_tables(database).await?;
    let mut fields = serde_json::Map::new();
    fields.insert("tables".into(), json!(tables));
    Ok(ok_json(fields))
}

/// `GET /schema/columns` - list columns/fields of a table or collection.
pub async fn columns(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Response> {
    let payload = params_payload(&params);
    let session = authorize_signed(&state, &headers, &payload).await?;
    let database = required(&params, "database")?;
    let table = required(&params, "table")?;

    let columns = session.adapter.get_columns(database, table).await?;
    let mut fields = serde_json::Map::new();
    fields.insert("columns".into(), json!(columns));
    Ok(ok_json(fields))
}
