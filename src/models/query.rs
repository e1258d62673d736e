//! Query-related data models.
//!
//! This module defines the normalized tabular result shape returned by every
//! adapter, and the per-call execution options threaded through the gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Maximum rows a single query may request.
pub const MAX_ROW_LIMIT: u32 = 10_000;

/// Column metadata for a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Human-readable engine type (e.g., "integer", "varchar", "objectId")
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Normalized tabular result returned by every adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub columns: Vec<ColumnMeta>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a result from rows and columns.
    pub fn from_rows(
        rows: Vec<serde_json::Map<String, JsonValue>>,
        columns: Vec<ColumnMeta>,
        execution_time_ms: u64,
    ) -> Self {
        let row_count = rows.len();
        Self {
            rows,
            columns,
            row_count,
            execution_time_ms,
        }
    }

    /// Create a result for a non-row-producing statement.
    ///
    /// The single synthetic row describes the command outcome
    /// (affectedRows, insertId, acknowledged, ...).
    pub fn command(row: serde_json::Map<String, JsonValue>, execution_time_ms: u64) -> Self {
        let columns = row
            .keys()
            .map(|k| ColumnMeta::new(k.clone(), "command"))
            .collect();
        Self {
            rows: vec![row],
            columns,
            row_count: 1,
            execution_time_ms,
        }
    }

    /// Create a synthetic row for a simulated destructive operation.
    ///
    /// The underlying database is not touched; the row tells the client the
    /// statement was accepted but intercepted.
    pub fn simulated(operation: &str, execution_time_ms: u64) -> Self {
        let mut row = serde_json::Map::new();
        row.insert("acknowledged".into(), JsonValue::Bool(true));
        row.insert("simulated".into(), JsonValue::Bool(true));
        row.insert("operation".into(), JsonValue::String(operation.to_string()));
        row.insert(
            "message".into(),
            JsonValue::String(format!(
                "{} simulated on shared default connection; no data was modified",
                operation
            )),
        );
        Self::command(row, execution_time_ms)
    }

    /// Check whether this result represents a simulated destructive operation.
    pub fn is_simulated(&self) -> bool {
        self.rows
            .first()
            .and_then(|r| r.get("simulated"))
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }
}

/// Per-call execution options threaded from the HTTP layer to the adapters.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Row cap; when absent the configured default limit applies.
    pub limit: Option<u32>,
    /// Pagination start, applied only when > 0.
    pub offset: Option<u64>,
    /// Rewrite the statement as a plan request instead of executing it.
    pub explain: bool,
    pub user_id: Option<String>,
    pub is_isolated: bool,
    pub user_database: Option<String>,
    /// Bypass destructive simulation on privileged default sessions.
    pub allow_destructive: bool,
    /// Suppress the default row cap (export path).
    pub unlimited: bool,
}

impl QueryOptions {
    /// Effective limit given a configured default, honoring `unlimited`.
    pub fn effective_limit(&self, default_limit: u32) -> Option<u32> {
        if self.unlimited && self.limit.is_none() {
            return None;
        }
        Some(
            self.limit
                .map(|l| l.clamp(1, MAX_ROW_LIMIT))
                .unwrap_or(default_limit),
        )
    }
}
