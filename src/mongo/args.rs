//! Mongo shell argument normalization and BSON revival.
//!
//! Shell argument lists are not JSON: they carry single quotes, unquoted
//! keys, regex literals and constructor calls (`ObjectId(...)`,
//! `ISODate(...)`, `NumberLong(...)`). The normalizer rewrites them into
//! strict JSON, replacing BSON constructors with tagged markers
//! (`__$oid`, `__$date`, `__$numberLong`, `__$regex`) that a post-pass
//! revives into typed BSON values. Keeping the tolerant rewrite separate
//! from the strict JSON parse keeps both sides simple.

use mongodb::bson::{doc, Bson, Document};
use serde_json::Value as JsonValue;

use crate::error::{GatewayError, GatewayResult};

/// Parse a shell argument list (the text between call parentheses) into
/// JSON values with BSON markers in place.
pub fn parse_args(raw: &str) -> GatewayResult<Vec<JsonValue>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let normalized = normalize_args(trimmed);

    // A single argument parses directly.
    if let Ok(value) = serde_json::from_str::<JsonValue>(&normalized) {
        return Ok(vec![value]);
    }
    // Multiple arguments parse as an array.
    if let Ok(JsonValue::Array(values)) =
        serde_json::from_str::<JsonValue>(&format!("[{}]", normalized))
    {
        return Ok(values);
    }
    // Last resort: split on top-level commas and parse piecewise.
    let mut values = Vec::new();
    for piece in split_top_level_commas(&normalized) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match serde_json::from_str::<JsonValue>(piece) {
            Ok(value) => values.push(value),
            Err(e) => {
                return Err(GatewayError::validation(format!(
                    "Could not parse argument '{}': {} (check quotes and matching braces)",
                    piece, e
                )))
            }
        }
    }
    Ok(values)
}

/// Rewrite shell-flavored argument text into strict JSON.
pub fn normalize_args(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => i = copy_double_quoted(&chars, i, &mut out),
            '\'' => i = convert_single_quoted(&chars, i, &mut out),
            '/' if regex_position(&out) => i = convert_regex_literal(&chars, i, &mut out),
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                i = handle_identifier(&chars, i, &mut out)
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Copy a double-quoted string verbatim, honoring backslash escapes.
fn copy_double_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            out.push(c);
            out.push(chars[i + 1]);
            i += 2;
            continue;
        }
        out.push(c);
        i += 1;
        if c == '"' {
            break;
        }
    }
    i
}

/// Convert a single-quoted string to a double-quoted one.
fn convert_single_quoted(chars: &[char], start: usize, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            let next = chars[i + 1];
            if next == '\'' {
                out.push('\'');
            } else {
                out.push('\\');
                out.push(next);
            }
            i += 2;
            continue;
        }
        if c == '\'' {
            i += 1;
            break;
        }
        if c == '"' {
            out.push('\\');
        }
        out.push(c);
        i += 1;
    }
    out.push('"');
    i
}

/// A `/` opens a regex literal only in value position: at the start of the
/// argument list or right after an opening bracket, comma or key colon.
fn regex_position(out: &str) -> bool {
    match out.trim_end().chars().last() {
        None => true,
        Some(c) => matches!(c, '{' | '[' | '(' | ',' | ':'),
    }
}

/// Convert `/pattern/flags` into its tagged marker object.
fn convert_regex_literal(chars: &[char], start: usize, out: &mut String) -> usize {
    let mut pattern = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            pattern.push(c);
            pattern.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == '/' {
            i += 1;
            break;
        }
        pattern.push(c);
        i += 1;
    }
    let mut flags = String::new();
    while i < chars.len() && chars[i].is_ascii_alphabetic() {
        flags.push(chars[i]);
        i += 1;
    }
    out.push_str(&format!(
        r#"{{"__$regex":{},"__$options":{}}}"#,
        JsonValue::String(pattern),
        JsonValue::String(flags)
    ));
    i
}

/// Handle an identifier: a BSON constructor, a JSON literal, or a bare key.
fn handle_identifier(chars: &[char], start: usize, out: &mut String) -> usize {
    let mut i = start;
    let mut ident = String::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.' {
            ident.push(c);
            i += 1;
        } else {
            break;
        }
    }

    // `new Date(...)` spans two identifiers.
    if ident == "new" {
        let mut j = i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        let rest: String = chars[j..].iter().take(5).collect();
        if rest.starts_with("Date") {
            j += 4;
            if let Some((inner, end)) = read_call_args(chars, j) {
                emit_date_marker(&inner, out);
                return end;
            }
        }
        out.push_str(&ident);
        return i;
    }

    if let Some((inner, end)) = read_call_args(chars, i) {
        match ident.as_str() {
            "ObjectId" => {
                out.push_str(&format!(
                    r#"{{"__$oid":{}}}"#,
                    JsonValue::String(strip_quotes(&inner))
                ));
                return end;
            }
            "ISODate" | "Date" => {
                emit_date_marker(&inner, out);
                return end;
            }
            "NumberLong" => {
                out.push_str(&format!(
                    r#"{{"__$numberLong":{}}}"#,
                    JsonValue::String(strip_quotes(&inner))
                ));
                return end;
            }
            "NumberInt" => {
                out.push_str(&strip_quotes(&inner));
                return end;
            }
            "NumberDecimal" => {
                out.push_str(&JsonValue::String(strip_quotes(&inner)).to_string());
                return end;
            }
            _ => {}
        }
    }

    match ident.as_str() {
        "true" | "false" | "null" => out.push_str(&ident),
        "undefined" => out.push_str("null"),
        _ => {
            // Bare object key: quote it when a colon follows.
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if chars.get(j) == Some(&':') {
                out.push_str(&JsonValue::String(ident).to_string());
            } else {
                out.push_str(&ident);
            }
        }
    }
    i
}

fn emit_date_marker(inner: &str, out: &mut String) {
    let inner = inner.trim();
    if inner.is_empty() {
        out.push_str(r#"{"__$date":""}"#);
    } else if inner.starts_with('"') || inner.starts_with('\'') {
        out.push_str(&format!(
            r#"{{"__$date":{}}}"#,
            JsonValue::String(strip_quotes(inner))
        ));
    } else {
        out.push_str(&format!(r#"{{"__$date":{}}}"#, inner));
    }
}

/// If `chars[from]` opens a call's parentheses, return the inner text and
/// the index one past the closing paren.
fn read_call_args(chars: &[char], from: usize) -> Option<(String, usize)> {
    let mut i = from;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    if chars.get(i) != Some(&'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut inner = String::new();
    let mut j = i;
    let mut in_string: Option<char> = None;
    while j < chars.len() {
        let c = chars[j];
        if let Some(quote) = in_string {
            if c == '\\' && j + 1 < chars.len() {
                inner.push(c);
                inner.push(chars[j + 1]);
                j += 2;
                continue;
            }
            if c == quote {
                in_string = None;
            }
            inner.push(c);
            j += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                in_string = Some(c);
                inner.push(c);
            }
            '(' => {
                depth += 1;
                if depth > 1 {
                    inner.push(c);
                }
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((inner, j + 1));
                }
                inner.push(c);
            }
            c => inner.push(c),
        }
        j += 1;
    }
    None
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Split normalized JSON-ish text on top-level commas.
pub fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    let mut in_string = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if in_string {
            current.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '{' | '[' | '(' => {
                depth += 1;
                current.push(c);
            }
            '}' | ']' | ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                pieces.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

// =============================================================================
// Marker revival
// =============================================================================

/// Revive tagged markers in a parsed JSON value into typed BSON.
pub fn revive_to_bson(value: &JsonValue) -> Bson {
    match value {
        JsonValue::Null => Bson::Null,
        JsonValue::Bool(b) => Bson::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    Bson::Int32(i as i32)
                } else {
                    Bson::Int64(i)
                }
            } else {
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => Bson::String(s.clone()),
        JsonValue::Array(items) => Bson::Array(items.iter().map(revive_to_bson).collect()),
        JsonValue::Object(map) => {
            if let Some(JsonValue::String(hex)) = map.get("__$oid") {
                return match mongodb::bson::oid::ObjectId::parse_str(hex) {
                    Ok(oid) => Bson::ObjectId(oid),
                    Err(_) => Bson::String(hex.clone()),
                };
            }
            if let Some(date) = map.get("__$date") {
                return revive_date(date);
            }
            if let Some(JsonValue::String(n)) = map.get("__$numberLong") {
                return n
                    .parse::<i64>()
                    .map(Bson::Int64)
                    .unwrap_or_else(|_| Bson::String(n.clone()));
            }
            if let Some(JsonValue::String(pattern)) = map.get("__$regex") {
                let options = map
                    .get("__$options")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default();
                return Bson::RegularExpression(mongodb::bson::Regex {
                    pattern: pattern.clone(),
                    options: options.to_string(),
                });
            }
            let mut document = Document::new();
            for (key, value) in map {
                document.insert(key.clone(), revive_to_bson(value));
            }
            Bson::Document(document)
        }
    }
}

fn revive_date(value: &JsonValue) -> Bson {
    match value {
        JsonValue::String(s) if s.is_empty() => Bson::DateTime(mongodb::bson::DateTime::now()),
        JsonValue::String(s) => match chrono::DateTime::parse_from_rfc3339(s) {
            Ok(dt) => Bson::DateTime(mongodb::bson::DateTime::from_millis(dt.timestamp_millis())),
            Err(_) => Bson::String(s.clone()),
        },
        JsonValue::Number(n) => {
            Bson::DateTime(mongodb::bson::DateTime::from_millis(n.as_i64().unwrap_or(0)))
        }
        other => revive_to_bson(other),
    }
}

/// Revive a value expected to be a document (filter, update, pipeline stage).
pub fn value_to_document(value: &JsonValue) -> GatewayResult<Document> {
    match revive_to_bson(value) {
        Bson::Document(doc) => Ok(doc),
        other => Err(GatewayError::validation(format!(
            "Expected a document argument, got {}",
            bson_kind_name(&other)
        ))),
    }
}

/// Revive an argument that may be absent into a document, defaulting empty.
pub fn optional_document(args: &[JsonValue], index: usize) -> GatewayResult<Document> {
    match args.get(index) {
        Some(value) => value_to_document(value),
        None => Ok(doc! {}),
    }
}

/// Human-readable BSON kind name, used in errors and column inference.
pub fn bson_kind_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null => "null",
        Bson::Boolean(_) => "bool",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Double(_) => "double",
        Bson::Decimal128(_) => "decimal",
        Bson::String(_) => "string",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Binary(_) => "binData",
        Bson::RegularExpression(_) => "regex",
        Bson::Timestamp(_) => "timestamp",
        _ => "unknown",
    }
}
