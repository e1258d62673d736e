//! SQL statement splitting.
//!
//! Splits a SQL buffer into individual statements on top-level semicolons,
//! respecting single-quoted strings, double-quoted identifiers, escaped
//! quotes, line and block comments, and PostgreSQL dollar-quoted bodies
//! (`$$...$$` and `$tag$...$tag$`).

/// Split a SQL buffer into trimmed, non-empty statements in source order.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i += 2;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b'$' => {
                if let Some(tag_end) = dollar_tag_end(bytes, i) {
                    let tag = &sql[i..tag_end];
                    // Body runs to the next occurrence of the same literal tag.
                    match sql[tag_end..].find(tag) {
                        Some(rel) => i = tag_end + rel + tag.len(),
                        None => i = bytes.len(),
                    }
                } else {
                    i += 1;
                }
            }
            b';' => {
                push_statement(sql, start, i, &mut statements);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }

    push_statement(sql, start, bytes.len(), &mut statements);
    statements
}

/// Skip a quoted region starting at `start` (which holds the quote char).
/// Handles backslash escapes and doubled quotes.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            // Doubled quote is an escaped quote, not a terminator.
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// If `bytes[start..]` opens a dollar-quote tag (`$`, `$tag$`), return the
/// index one past the closing `$` of the tag.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'$' {
            return Some(i + 1);
        }
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        i += 1;
    }
    None
}

fn push_statement(sql: &str, start: usize, end: usize, statements: &mut Vec<String>) {
    let stmt = sql[start..end].trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_statement() {
        assert_eq!(split_statements("SELECT 1"), vec!["SELECT 1"]);
    }

    #[test]
    fn test_trailing_semicolon_dropped() {
        assert_eq!(split_statements("SELECT 1;"), vec!["SELECT 1"]);
    }

    #[test]
    fn test_multiple_statements() {
        assert_eq!(
            split_statements("SELECT 1; SELECT 2;  SELECT 3"),
            vec!["SELECT 1", "SELECT 2", "SELECT 3"]
        );
    }

    #[test]
    fn test_semicolon_inside_single_quotes() {
        assert_eq!(
            split_statements("INSERT INTO t VALUES ('a;b'); SELECT 1"),
            vec!["INSERT INTO t VALUES ('a;b')", "SELECT 1"]
        );
    }

    #[test]
    fn test_semicolon_inside_double_quotes() {
        assert_eq!(
            split_statements(r#"SELECT ";" FROM "odd;name"; SELECT 2"#),
            vec![r#"SELECT ";" FROM "odd;name""#, "SELECT 2"]
        );
    }

    #[test]
    fn test_escaped_quote_does_not_close_string() {
        assert_eq!(
            split_statements(r"SELECT 'it\'s; fine'; SELECT 2"),
            vec![r"SELECT 'it\'s; fine'", "SELECT 2"]
        );
    }

    #[test]
    fn test_doubled_quote_does_not_close_string() {
        assert_eq!(
            split_statements("SELECT 'it''s; fine'; SELECT 2"),
            vec!["SELECT 'it''s; fine'", "SELECT 2"]
        );
    }

    #[test]
    fn test_line_comment_hides_semicolon() {
        assert_eq!(
            split_statements("SELECT 1 -- trailing; comment\n; SELECT 2"),
            vec!["SELECT 1 -- trailing; comment", "SELECT 2"]
        );
    }

    #[test]
    fn test_block_comment_hides_semicolon() {
        assert_eq!(
            split_statements("SELECT 1 /* a;b */; SELECT 2"),
            vec!["SELECT 1 /* a;b */", "SELECT 2"]
        );
    }

    #[test]
    fn test_dollar_quoted_function_body() {
        let sql = "INSERT INTO t VALUES ('a;b'); CREATE FUNCTION f() RETURNS void AS $$ BEGIN END; $$ LANGUAGE plpgsql; SELECT 1";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "INSERT INTO t VALUES ('a;b')");
        assert!(statements[1].contains("BEGIN END; $$"));
        assert_eq!(statements[2], "SELECT 1");
    }

    #[test]
    fn test_tagged_dollar_quote() {
        let sql = "CREATE FUNCTION f() AS $body$ SELECT ';'; $body$ LANGUAGE sql; SELECT 1";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("$body$ SELECT ';'; $body$"));
    }

    #[test]
    fn test_mismatched_tags_do_not_nest() {
        // $a$ opens a body that only $a$ closes; the inner $b$ is literal text.
        let sql = "SELECT $a$ x $b$ y; $a$; SELECT 2";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("$b$ y; $a$"));
        assert_eq!(statements[1], "SELECT 2");
    }

    #[test]
    fn test_lone_dollar_not_a_quote() {
        assert_eq!(
            split_statements("SELECT price $ tax FROM t; SELECT 2").len(),
            2
        );
    }

    #[test]
    fn test_empty_and_whitespace_only() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("  ;;  ; ").is_empty());
    }
}
