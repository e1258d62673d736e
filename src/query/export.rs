//! Result export rendering.
//!
//! Renders a query result as CSV or a single JSON array for download. The
//! export path runs the adapter without a default row cap; rendering here is
//! purely mechanical.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::QueryResult;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Csv => "export.csv",
            Self::Json => "export.json",
        }
    }
}

/// Render a result as CSV.
///
/// The header row comes from the declared columns, or the union of row keys
/// when no columns were declared. Cells are escaped by doubling `"` and
/// wrapping whenever the value contains a comma, quote or newline.
pub fn render_csv(result: &QueryResult) -> String {
    let headers = header_names(result);
    let mut out = String::new();

    out.push_str(
        &headers
            .iter()
            .map(|h| escape_csv_cell(h))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    for row in &result.rows {
        let line = headers
            .iter()
            .map(|key| {
                row.get(key.as_str())
                    .map(|v| escape_csv_cell(&render_cell(v)))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Render a result as a single top-level JSON array of row objects.
pub fn render_json(result: &QueryResult) -> String {
    serde_json::to_string(&result.rows).unwrap_or_else(|_| "[]".to_string())
}

fn header_names(result: &QueryResult) -> Vec<String> {
    if !result.columns.is_empty() {
        return result.columns.iter().map(|c| c.name.clone()).collect();
    }
    let mut names = Vec::new();
    for row in &result.rows {
        for key in row.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }
    names
}

/// Coerce a JSON value to its CSV cell text. Objects and arrays render as
/// canonical JSON; null renders empty.
fn render_cell(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}

fn escape_csv_cell(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') || cell.contains('\r') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
