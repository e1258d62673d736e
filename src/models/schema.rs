//! Schema inspection data models.

use serde::{Deserialize, Serialize};

/// A database (or schema) visible to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
}

/// Whether a relation is a base table, a view, or a Mongo collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    Table,
    View,
    Collection,
}

impl TableType {
    /// Parse from an information_schema TABLE_TYPE string.
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "VIEW" => Self::View,
            _ => Self::Table,
        }
    }
}

/// A table, view or collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub table_type: TableType,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, table_type: TableType) -> Self {
        Self {
            name: name.into(),
            table_type,
        }
    }
}

/// A column (or inferred document field).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
    pub primary_key: bool,
}
