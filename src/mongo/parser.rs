//! Mongo shell statement parsing.
//!
//! Turns a shell-style statement such as
//! `db.students.find({age: {$gt: 10}}, {name: 1}).sort({name: 1}).limit(5);`
//! into a typed query the adapter can dispatch: target (collection, db or
//! admin), operation, parsed arguments and the trailing method chain.

use serde_json::Value as JsonValue;

use crate::error::{GatewayError, GatewayResult};
use crate::mongo::args::parse_args;

/// What a parsed statement addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    Collection,
    Db,
    Admin,
}

/// One chained method call, e.g. `.sort({name: 1})`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainCall {
    pub name: String,
    pub args: Vec<JsonValue>,
}

/// A fully parsed shell statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMongoQuery {
    pub database: Option<String>,
    pub collection: Option<String>,
    pub operation: String,
    pub args: Vec<JsonValue>,
    pub chain: Vec<ChainCall>,
    pub target: QueryTarget,
}

/// Parse a Mongo shell statement.
pub fn parse_mongo_query(input: &str) -> GatewayResult<ParsedMongoQuery> {
    let statement = prepare(input)?;

    if let Some(parsed) = parse_shell_command(&statement)? {
        return Ok(parsed);
    }

    let segments = split_top_level_dots(&statement);
    if segments.is_empty() || segments[0].trim() != "db" {
        return Err(GatewayError::validation(
            "Query must start with 'db.' (e.g. db.collection.find({}))",
        ));
    }

    let mut database = None;
    let mut idx = 1;

    if let Some((name, args_text)) = parse_call(segments.get(idx).map(String::as_str).unwrap_or(""))
    {
        if name == "getSiblingDB" {
            let args = parse_args(args_text)?;
            let Some(JsonValue::String(db_name)) = args.first() else {
                return Err(GatewayError::validation(
                    "getSiblingDB expects a database name string",
                ));
            };
            database = Some(db_name.clone());
            idx += 1;
        }
    }

    let Some(segment) = segments.get(idx) else {
        return Err(GatewayError::validation(
            "Incomplete query: expected an operation or collection after 'db.'",
        ));
    };

    // db.admin().<op>(...)
    if let Some((name, args_text)) = parse_call(segment) {
        if name == "admin" && args_text.trim().is_empty() {
            let Some(op_segment) = segments.get(idx + 1) else {
                return Err(GatewayError::validation(
                    "Incomplete query: expected an operation after admin()",
                ));
            };
            let Some((op, op_args)) = parse_call(op_segment) else {
                return Err(GatewayError::validation(format!(
                    "Expected a call after admin(), got '{}'",
                    op_segment
                )));
            };
            ensure_no_trailing(&segments, idx + 2)?;
            return Ok(ParsedMongoQuery {
                database,
                collection: None,
                operation: op.to_string(),
                args: parse_args(op_args)?,
                chain: Vec::new(),
                target: QueryTarget::Admin,
            });
        }

        // Database-level operation: db.<op>(...)
        ensure_no_trailing(&segments, idx + 1)?;
        let args = parse_args(args_text)?;
        let db_for_use = if name == "use" {
            args.first().and_then(JsonValue::as_str).map(String::from)
        } else {
            None
        };
        return Ok(ParsedMongoQuery {
            database: db_for_use.or(database),
            collection: None,
            operation: name.to_string(),
            args,
            chain: Vec::new(),
            target: QueryTarget::Db,
        });
    }

    // Collection access: db.<collection>.<op>(...).<chain>()...
    let collection = segment.trim();
    if collection.is_empty() || !is_valid_collection_name(collection) {
        return Err(GatewayError::validation(format!(
            "Invalid collection name '{}'",
            collection
        )));
    }

    let Some(op_segment) = segments.get(idx + 1) else {
        return Err(GatewayError::validation(format!(
            "Incomplete query: expected an operation on collection '{}'",
            collection
        )));
    };
    if op_segment.trim() == "length" {
        return Err(GatewayError::validation(
            "'.length' is not supported; use countDocuments() to count matching documents",
        ));
    }
    let Some((operation, op_args)) = parse_call(op_segment) else {
        return Err(GatewayError::validation(format!(
            "Expected a method call on collection '{}', got '{}'",
            collection, op_segment
        )));
    };

    let mut chain = Vec::new();
    for chained in &segments[idx + 2..] {
        if chained.trim() == "length" {
            return Err(GatewayError::validation(
                "'.length' is not supported; use countDocuments() to count matching documents",
            ));
        }
        let Some((name, chain_args)) = parse_call(chained) else {
            return Err(GatewayError::validation(format!(
                "Expected a chained method call, got '{}'",
                chained
            )));
        };
        chain.push(ChainCall {
            name: name.to_string(),
            args: parse_args(chain_args)?,
        });
    }

    Ok(ParsedMongoQuery {
        database,
        collection: Some(collection.to_string()),
        operation: operation.to_string(),
        args: parse_args(op_args)?,
        chain,
        target: QueryTarget::Collection,
    })
}

/// Strip the trailing semicolon and optional outer quotes.
fn prepare(input: &str) -> GatewayResult<String> {
    let mut s = input.trim();
    if s.is_empty() {
        return Err(GatewayError::validation("Query is empty"));
    }
    s = s.trim_end_matches(';').trim();
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            let inner = &s[1..s.len() - 1];
            if !inner.contains(quote) {
                s = inner.trim();
            }
        }
    }
    if s.is_empty() {
        return Err(GatewayError::validation("Query is empty"));
    }
    Ok(s.to_string())
}

/// Recognize non-method shell commands: `show dbs`, `show collections`,
/// `use <name>`.
fn parse_shell_command(statement: &str) -> GatewayResult<Option<ParsedMongoQuery>> {
    let lower = statement.to_lowercase();
    if lower == "show dbs" || lower == "show databases" {
        return Ok(Some(ParsedMongoQuery {
            database: None,
            collection: None,
            operation: "listDatabases".into(),
            args: Vec::new(),
            chain: Vec::new(),
            target: QueryTarget::Admin,
        }));
    }
    if lower == "show collections" {
        return Ok(Some(ParsedMongoQuery {
            database: None,
            collection: None,
            operation: "listCollections".into(),
            args: Vec::new(),
            chain: Vec::new(),
            target: QueryTarget::Db,
        }));
    }
    if let Some(rest) = statement.strip_prefix("use ").or_else(|| lower.strip_prefix("use ").map(|_| statement[4..].trim())) {
        let name = rest.trim().trim_matches(|c| c == '"' || c == '\'');
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(GatewayError::validation("use expects a single database name"));
        }
        return Ok(Some(ParsedMongoQuery {
            database: Some(name.to_string()),
            collection: None,
            operation: "use".into(),
            args: vec![JsonValue::String(name.to_string())],
            chain: Vec::new(),
            target: QueryTarget::Db,
        }));
    }
    Ok(None)
}

/// Split a statement on top-level dots, ignoring dots inside brackets and
/// string literals.
fn split_top_level_dots(statement: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut chars = statement.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            current.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                continue;
            }
            if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                in_string = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            '.' if depth == 0 => {
                segments.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// If a segment is a call (`name(args)`), return the name and the raw
/// argument text.
fn parse_call(segment: &str) -> Option<(&str, &str)> {
    let segment = segment.trim();
    let open = segment.find('(')?;
    if !segment.ends_with(')') {
        return None;
    }
    let name = segment[..open].trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return None;
    }
    Some((name, &segment[open + 1..segment.len() - 1]))
}

fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn ensure_no_trailing(segments: &[String], from: usize) -> GatewayResult<()> {
    if segments.len() > from {
        return Err(GatewayError::validation(format!(
            "Unexpected trailing call '{}'",
            segments[from]
        )));
    }
    Ok(())
}
