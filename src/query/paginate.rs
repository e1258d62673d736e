//! SQL pagination and EXPLAIN rewriting.
//!
//! Appends `LIMIT`/`OFFSET` to a single SELECT-like statement, or rewrites it
//! as a plan request. Statements that already carry a row cap, span multiple
//! statements, or are not SELECT-like pass through untouched.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::DatabaseKind;
use crate::query::split::split_statements;

static SELECT_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(select|with|show|describe|explain)\b").unwrap());
static HAS_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(limit\s+\d|fetch\s+first)\b").unwrap());
static HAS_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\boffset\s+\d").unwrap());

/// Check whether a statement is SELECT-like (row-producing).
pub fn is_select_like(sql: &str) -> bool {
    SELECT_LIKE.is_match(sql)
}

/// Append `LIMIT`/`OFFSET` to a single SELECT-like statement.
///
/// No-op when the input is empty, contains multiple statements, already
/// carries `LIMIT`/`FETCH FIRST`, or is not SELECT-like. A trailing semicolon
/// is preserved.
pub fn apply_pagination(
    sql: &str,
    limit: Option<u32>,
    offset: Option<u64>,
    default_limit: u32,
) -> String {
    let trimmed = sql.trim();
    if trimmed.is_empty()
        || split_statements(trimmed).len() != 1
        || HAS_LIMIT.is_match(trimmed)
        || !is_select_like(trimmed)
    {
        return sql.to_string();
    }

    let (body, had_semicolon) = match trimmed.strip_suffix(';') {
        Some(body) => (body.trim_end(), true),
        None => (trimmed, false),
    };

    let mut rewritten = format!("{} LIMIT {}", body, limit.unwrap_or(default_limit));
    if let Some(offset) = offset {
        if offset > 0 && !HAS_OFFSET.is_match(body) {
            rewritten.push_str(&format!(" OFFSET {}", offset));
        }
    }
    if had_semicolon {
        rewritten.push(';');
    }
    rewritten
}

/// Rewrite a SELECT-like statement as a plan request for the given engine.
pub fn rewrite_as_explain(sql: &str, kind: DatabaseKind) -> String {
    let body = sql.trim().trim_end_matches(';').trim_end();
    match kind {
        DatabaseKind::PostgreSql => format!("EXPLAIN (ANALYZE, COSTS, BUFFERS) {}", body),
        _ => format!("EXPLAIN {}", body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: u32 = 1000;

    #[test]
    fn test_appends_limit() {
        assert_eq!(
            apply_pagination("SELECT * FROM t", Some(50), None, DEFAULT),
            "SELECT * FROM t LIMIT 50"
        );
    }

    #[test]
    fn test_default_limit_applied() {
        assert_eq!(
            apply_pagination("SELECT * FROM t", None, None, DEFAULT),
            "SELECT * FROM t LIMIT 1000"
        );
    }

    #[test]
    fn test_trailing_semicolon_preserved() {
        assert_eq!(
            apply_pagination("SELECT * FROM t;", Some(50), None, DEFAULT),
            "SELECT * FROM t LIMIT 50;"
        );
    }

    #[test]
    fn test_existing_limit_is_noop() {
        assert_eq!(
            apply_pagination("SELECT * FROM t LIMIT 5", Some(50), None, DEFAULT),
            "SELECT * FROM t LIMIT 5"
        );
    }

    #[test]
    fn test_fetch_first_is_noop() {
        let sql = "SELECT * FROM t FETCH FIRST 10 ROWS ONLY";
        assert_eq!(apply_pagination(sql, Some(50), None, DEFAULT), sql);
    }

    #[test]
    fn test_multi_statement_is_noop() {
        assert_eq!(
            apply_pagination("SELECT 1; SELECT 2", Some(50), None, DEFAULT),
            "SELECT 1; SELECT 2"
        );
    }

    #[test]
    fn test_non_select_is_noop() {
        assert_eq!(
            apply_pagination("INSERT INTO t VALUES (1)", Some(50), None, DEFAULT),
            "INSERT INTO t VALUES (1)"
        );
        assert_eq!(apply_pagination("", Some(50), None, DEFAULT), "");
    }

    #[test]
    fn test_offset_applied_when_positive() {
        assert_eq!(
            apply_pagination("SELECT * FROM t", Some(50), Some(20), DEFAULT),
            "SELECT * FROM t LIMIT 50 OFFSET 20"
        );
    }

    #[test]
    fn test_zero_offset_skipped() {
        assert_eq!(
            apply_pagination("SELECT * FROM t", Some(50), Some(0), DEFAULT),
            "SELECT * FROM t LIMIT 50"
        );
    }

    #[test]
    fn test_existing_offset_not_duplicated() {
        assert_eq!(
            apply_pagination("SELECT * FROM t OFFSET 5", Some(50), Some(20), DEFAULT),
            "SELECT * FROM t OFFSET 5 LIMIT 50"
        );
    }

    #[test]
    fn test_pagination_idempotent() {
        let once = apply_pagination("SELECT * FROM t", Some(50), None, DEFAULT);
        let twice = apply_pagination(&once, Some(50), None, DEFAULT);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_cte_is_select_like() {
        assert_eq!(
            apply_pagination("WITH x AS (SELECT 1) SELECT * FROM x", None, None, 10),
            "WITH x AS (SELECT 1) SELECT * FROM x LIMIT 10"
        );
    }

    #[test]
    fn test_explain_rewrite_postgres() {
        assert_eq!(
            rewrite_as_explain("SELECT * FROM t;", DatabaseKind::PostgreSql),
            "EXPLAIN (ANALYZE, COSTS, BUFFERS) SELECT * FROM t"
        );
    }

    #[test]
    fn test_explain_rewrite_mysql() {
        assert_eq!(
            rewrite_as_explain("SELECT * FROM t", DatabaseKind::MySql),
            "EXPLAIN SELECT * FROM t"
        );
    }
}
