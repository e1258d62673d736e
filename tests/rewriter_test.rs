//! Integration tests for the SQL pagination rewriter and statement splitter.

use query_gateway::query::{apply_pagination, split_statements};

#[test]
fn test_pagination_appends_limit() {
    assert_eq!(
        apply_pagination("SELECT * FROM t", Some(50), None, 1000),
        "SELECT * FROM t LIMIT 50"
    );
}

#[test]
fn test_pagination_keeps_trailing_semicolon() {
    assert_eq!(
        apply_pagination("SELECT * FROM t;", Some(50), None, 1000),
        "SELECT * FROM t LIMIT 50;"
    );
}

#[test]
fn test_pagination_noop_when_already_limited() {
    assert_eq!(
        apply_pagination("SELECT * FROM t LIMIT 5", Some(50), None, 1000),
        "SELECT * FROM t LIMIT 5"
    );
}

#[test]
fn test_pagination_noop_on_multi_statement() {
    assert_eq!(
        apply_pagination("SELECT 1; SELECT 2", Some(50), None, 1000),
        "SELECT 1; SELECT 2"
    );
}

#[test]
fn test_pagination_idempotent() {
    let once = apply_pagination("SELECT * FROM t", None, None, 1000);
    assert_eq!(once, apply_pagination(&once, None, None, 1000));
}

#[test]
fn test_splitter_preserves_function_body() {
    let sql = "INSERT INTO t VALUES ('a;b'); CREATE FUNCTION f() RETURNS void AS $$ BEGIN END; $$ LANGUAGE plpgsql; SELECT 1";
    let statements = split_statements(sql);
    assert_eq!(statements.len(), 3);
    assert_eq!(statements[0], "INSERT INTO t VALUES ('a;b')");
    assert_eq!(
        statements[1],
        "CREATE FUNCTION f() RETURNS void AS $$ BEGIN END; $$ LANGUAGE plpgsql"
    );
    assert_eq!(statements[2], "SELECT 1");
}

#[test]
fn test_splitter_tagged_dollar_bodies() {
    let statements =
        split_statements("SELECT $tag$ text; with $$ inside $tag$; SELECT 2");
    assert_eq!(statements.len(), 2);
    assert!(statements[0].contains("$$ inside"));
}

#[test]
fn test_splitter_no_tag_nesting() {
    // The first $a$ closes at the next literal $a$, regardless of $b$.
    let statements = split_statements("SELECT $a$ x $b$ y $a$; SELECT 2");
    assert_eq!(statements.len(), 2);
}

#[test]
fn test_splitter_comments_and_strings() {
    let statements = split_statements(
        "SELECT 1 /* junk; here */; -- tail; comment\nSELECT ';'",
    );
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0], "SELECT 1 /* junk; here */");
    assert!(statements[1].ends_with("SELECT ';'"));
}
