//! Engine type mapping and row decoding.
//!
//! Maps driver type codes to the human-readable names exposed in result
//! columns (unknown codes become `unknown(<code>)`), and converts driver
//! rows into JSON maps.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach: `TypeCategory` classifies
//! column types into logical categories, then engine-specific decoders
//! extract values. The classification is shared; only the extraction
//! differs per engine.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

use crate::models::{ColumnMeta, DatabaseKind};

// =============================================================================
// Type Names
// =============================================================================

/// Fixed translation table from PostgreSQL type codes to display names.
const POSTGRES_TYPE_NAMES: &[(&str, &str)] = &[
    ("BOOL", "boolean"),
    ("INT2", "smallint"),
    ("INT4", "integer"),
    ("INT8", "bigint"),
    ("FLOAT4", "real"),
    ("FLOAT8", "double precision"),
    ("NUMERIC", "numeric"),
    ("MONEY", "money"),
    ("CHAR", "char"),
    ("VARCHAR", "varchar"),
    ("TEXT", "text"),
    ("BPCHAR", "char"),
    ("NAME", "name"),
    ("BYTEA", "bytea"),
    ("DATE", "date"),
    ("TIME", "time"),
    ("TIMETZ", "timetz"),
    ("TIMESTAMP", "timestamp"),
    ("TIMESTAMPTZ", "timestamptz"),
    ("INTERVAL", "interval"),
    ("UUID", "uuid"),
    ("JSON", "json"),
    ("JSONB", "jsonb"),
    ("INET", "inet"),
    ("CIDR", "cidr"),
    ("MACADDR", "macaddr"),
    ("OID", "oid"),
    ("XML", "xml"),
];

/// Fixed translation table from MySQL type codes to display names.
const MYSQL_TYPE_NAMES: &[(&str, &str)] = &[
    ("BOOLEAN", "boolean"),
    ("TINYINT", "tinyint"),
    ("SMALLINT", "smallint"),
    ("MEDIUMINT", "mediumint"),
    ("INT", "int"),
    ("BIGINT", "bigint"),
    ("TINYINT UNSIGNED", "tinyint unsigned"),
    ("SMALLINT UNSIGNED", "smallint unsigned"),
    ("INT UNSIGNED", "int unsigned"),
    ("BIGINT UNSIGNED", "bigint unsigned"),
    ("FLOAT", "float"),
    ("DOUBLE", "double"),
    ("DECIMAL", "decimal"),
    ("CHAR", "char"),
    ("VARCHAR", "varchar"),
    ("TEXT", "text"),
    ("TINYTEXT", "tinytext"),
    ("MEDIUMTEXT", "mediumtext"),
    ("LONGTEXT", "longtext"),
    ("BINARY", "binary"),
    ("VARBINARY", "varbinary"),
    ("BLOB", "blob"),
    ("TINYBLOB", "tinyblob"),
    ("MEDIUMBLOB", "mediumblob"),
    ("LONGBLOB", "longblob"),
    ("DATE", "date"),
    ("TIME", "time"),
    ("DATETIME", "datetime"),
    ("TIMESTAMP", "timestamp"),
    ("YEAR", "year"),
    ("ENUM", "enum"),
    ("SET", "set"),
    ("JSON", "json"),
    ("BIT", "bit"),
];

/// Translate a driver type code to its display name.
pub fn display_type(kind: DatabaseKind, raw: &str) -> String {
    let table = match kind {
        DatabaseKind::PostgreSql => POSTGRES_TYPE_NAMES,
        DatabaseKind::MySql => MYSQL_TYPE_NAMES,
        DatabaseKind::MongoDb => return raw.to_string(),
    };
    let upper = raw.to_uppercase();
    for (code, name) in table {
        if *code == upper {
            return (*name).to_string();
        }
    }
    format!("unknown({})", raw)
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for SQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    Text,
}

/// Classify a driver type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }
    if lower.contains("int") || lower.contains("serial") || lower.contains("year") {
        return TypeCategory::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    TypeCategory::Text
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper for raw DECIMAL/NUMERIC values decoded as strings, preserving the
/// exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row to JSON
// =============================================================================

/// Trait for converting driver rows to JSON maps with column metadata.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn column_meta(&self) -> Vec<ColumnMeta>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), postgres::decode_column(self, idx, category))
            })
            .collect()
    }

    fn column_meta(&self) -> Vec<ColumnMeta> {
        self.columns()
            .iter()
            .map(|col| {
                ColumnMeta::new(
                    col.name(),
                    display_type(DatabaseKind::PostgreSql, col.type_info().name()),
                )
            })
            .collect()
    }
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), mysql::decode_column(self, idx, category))
            })
            .collect()
    }

    fn column_meta(&self) -> Vec<ColumnMeta> {
        self.columns()
            .iter()
            .map(|col| {
                ColumnMeta::new(
                    col.name(),
                    display_type(DatabaseKind::MySql, col.type_info().name()),
                )
            })
            .collect()
    }
}

/// Encode binary column data: UTF-8 text passes through, anything else is
/// base64.
fn encode_binary(bytes: &[u8]) -> JsonValue {
    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.0))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Uuid => row
                .try_get::<Option<sqlx::types::Uuid>, _>(idx)
                .ok()
                .flatten()
                .map(|u| JsonValue::String(u.to_string()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Text => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return serde_json::Number::from_f64(v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return serde_json::Number::from_f64(v as f64)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string()));
        }
        JsonValue::Null
    }

    fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return JsonValue::String(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => row
                .try_get::<Option<RawDecimal>, _>(idx)
                .ok()
                .flatten()
                .map(|v| JsonValue::String(v.0))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<Option<JsonValue>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(JsonValue::Null),
            TypeCategory::Uuid | TypeCategory::Text => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return serde_json::Number::from_f64(v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return serde_json::Number::from_f64(v as f64)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string()));
        }
        JsonValue::Null
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            return JsonValue::String(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_type_names() {
        assert_eq!(display_type(DatabaseKind::PostgreSql, "INT4"), "integer");
        assert_eq!(display_type(DatabaseKind::PostgreSql, "int8"), "bigint");
        assert_eq!(
            display_type(DatabaseKind::PostgreSql, "TIMESTAMPTZ"),
            "timestamptz"
        );
        assert_eq!(display_type(DatabaseKind::PostgreSql, "JSONB"), "jsonb");
    }

    #[test]
    fn test_mysql_type_names() {
        assert_eq!(display_type(DatabaseKind::MySql, "VARCHAR"), "varchar");
        assert_eq!(
            display_type(DatabaseKind::MySql, "BIGINT UNSIGNED"),
            "bigint unsigned"
        );
        assert_eq!(display_type(DatabaseKind::MySql, "DATETIME"), "datetime");
    }

    #[test]
    fn test_unknown_type_code() {
        assert_eq!(
            display_type(DatabaseKind::PostgreSql, "TSVECTOR"),
            "unknown(TSVECTOR)"
        );
        assert_eq!(
            display_type(DatabaseKind::MySql, "GEOMETRY"),
            "unknown(GEOMETRY)"
        );
    }

    #[test]
    fn test_categorize_type() {
        assert_eq!(categorize_type("INT4"), TypeCategory::Integer);
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
        assert_eq!(categorize_type("BOOL"), TypeCategory::Boolean);
        assert_eq!(categorize_type("FLOAT8"), TypeCategory::Float);
        assert_eq!(categorize_type("JSONB"), TypeCategory::Json);
        assert_eq!(categorize_type("UUID"), TypeCategory::Uuid);
        assert_eq!(categorize_type("BYTEA"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
    }

    #[test]
    fn test_encode_binary_utf8_passthrough() {
        assert_eq!(encode_binary(b"hello"), JsonValue::String("hello".into()));
        let encoded = encode_binary(&[0xff, 0xfe, 0x00]);
        assert_eq!(encoded, JsonValue::String(STANDARD.encode([0xff, 0xfe, 0x00])));
    }
}
