//! Query validation and security sanitization.
//!
//! Every statement passes through here before execution: structural limits
//! (length, nesting depth), dialect-specific dangerous-pattern detection for
//! sessions bound to a shared default connection, and a dialect-aware
//! syntactic check. Isolated MySQL sessions additionally have their
//! cross-database references checked against the tenant's allowed set.

use std::ops::ControlFlow;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast::visit_relations;
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

use crate::error::{GatewayError, GatewayResult};
use crate::models::DatabaseKind;
use crate::mongo::parser::parse_mongo_query;

/// Context for one validation pass.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub kind: DatabaseKind,
    /// Dangerous-pattern detection applies only to shared default connections.
    pub is_default_connection: bool,
    pub max_query_length: usize,
    pub max_nested_depth: usize,
}

impl ValidationContext {
    pub fn new(kind: DatabaseKind, is_default_connection: bool) -> Self {
        Self {
            kind,
            is_default_connection,
            max_query_length: 100_000,
            max_nested_depth: 10,
        }
    }

    pub fn with_limits(mut self, max_query_length: usize, max_nested_depth: usize) -> Self {
        self.max_query_length = max_query_length;
        self.max_nested_depth = max_nested_depth;
        self
    }
}

struct DangerousPattern {
    regex: &'static LazyLock<Regex>,
    reason: &'static str,
}

macro_rules! pattern {
    ($name:ident, $re:literal) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).unwrap());
    };
}

pattern!(SQL_CHAINED_DROP, r"(?i);\s*drop\s+(table|database)");
pattern!(SQL_CHAINED_TRUNCATE, r"(?i);\s*truncate\b");
pattern!(SQL_CHAINED_DELETE, r"(?i);\s*delete\s+from\b");
pattern!(SQL_LINE_COMMENT, r"--");
pattern!(SQL_BLOCK_COMMENT, r"/\*.*\*/");
pattern!(
    SQL_ADMIN_DDL,
    r"(?i)\b(alter|create)\s+(database|schema|user|role)\b"
);
pattern!(SQL_GRANT, r"(?i)\bgrant\b");
pattern!(SQL_REVOKE, r"(?i)\brevoke\b");
pattern!(SQL_EXEC, r"(?i)\bexec(ute)?\s*\(");
pattern!(SQL_SP, r"(?i)\bsp_\w+");
pattern!(MYSQL_LOAD, r"(?i)\bload\s+(data|file)\b");
pattern!(MYSQL_OUTFILE, r"(?i)\binto\s+outfile\b");
pattern!(PG_COPY_PROGRAM, r"(?i)\bcopy\b.*\bfrom\s+program\b");
pattern!(PG_READ_FILE, r"(?i)\bpg_read_file\s*\(");
pattern!(MONGO_WHERE, r"\$where");
pattern!(MONGO_EVAL, r"\$eval");
pattern!(MONGO_FUNCTION, r"\$function");
pattern!(MONGO_DB_EVAL, r"(?i)db\.eval\s*\(");
pattern!(MONGO_RUN_COMMAND, r"(?i)db\.runCommand\s*\(");

static SQL_PATTERNS: &[DangerousPattern] = &[
    DangerousPattern {
        regex: &SQL_CHAINED_DROP,
        reason: "chained DROP statement",
    },
    DangerousPattern {
        regex: &SQL_CHAINED_TRUNCATE,
        reason: "chained TRUNCATE statement",
    },
    DangerousPattern {
        regex: &SQL_CHAINED_DELETE,
        reason: "chained DELETE statement",
    },
    DangerousPattern {
        regex: &SQL_LINE_COMMENT,
        reason: "SQL comment",
    },
    DangerousPattern {
        regex: &SQL_BLOCK_COMMENT,
        reason: "SQL comment",
    },
    DangerousPattern {
        regex: &SQL_ADMIN_DDL,
        reason: "administrative DDL",
    },
    DangerousPattern {
        regex: &SQL_GRANT,
        reason: "GRANT statement",
    },
    DangerousPattern {
        regex: &SQL_REVOKE,
        reason: "REVOKE statement",
    },
    DangerousPattern {
        regex: &SQL_EXEC,
        reason: "dynamic execution",
    },
    DangerousPattern {
        regex: &SQL_SP,
        reason: "system stored procedure",
    },
];

static MYSQL_PATTERNS: &[DangerousPattern] = &[
    DangerousPattern {
        regex: &MYSQL_LOAD,
        reason: "file access",
    },
    DangerousPattern {
        regex: &MYSQL_OUTFILE,
        reason: "file access",
    },
];

static POSTGRES_PATTERNS: &[DangerousPattern] = &[
    DangerousPattern {
        regex: &PG_COPY_PROGRAM,
        reason: "program execution",
    },
    DangerousPattern {
        regex: &PG_READ_FILE,
        reason: "file access",
    },
];

static MONGO_PATTERNS: &[DangerousPattern] = &[
    DangerousPattern {
        regex: &MONGO_WHERE,
        reason: "$where operator",
    },
    DangerousPattern {
        regex: &MONGO_EVAL,
        reason: "$eval operator",
    },
    DangerousPattern {
        regex: &MONGO_FUNCTION,
        reason: "$function operator",
    },
    DangerousPattern {
        regex: &MONGO_DB_EVAL,
        reason: "db.eval",
    },
    DangerousPattern {
        regex: &MONGO_RUN_COMMAND,
        reason: "db.runCommand",
    },
];

static DDL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(create|alter|drop|truncate)\s+(table|view|index|sequence|function|procedure|trigger|type|extension|materialized)\b")
        .unwrap()
});

/// Validate a query against the security policy.
pub fn validate_query(query: &str, ctx: &ValidationContext) -> GatewayResult<()> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::validation("Query is empty"));
    }
    if query.len() > ctx.max_query_length {
        return Err(GatewayError::validation(format!(
            "Query exceeds maximum length of {} characters",
            ctx.max_query_length
        )));
    }
    check_nesting_depth(query, ctx.max_nested_depth)?;

    if ctx.is_default_connection {
        check_dangerous_patterns(query, ctx.kind)?;
    }

    match ctx.kind {
        DatabaseKind::MongoDb => {
            let parsed = parse_mongo_query(trimmed)?;
            if ctx.is_default_connection {
                for arg in &parsed.args {
                    let rendered = arg.to_string();
                    if rendered.contains("$where") || rendered.contains("$eval") {
                        return Err(GatewayError::validation(
                            "Query contains a forbidden operator ($where/$eval)",
                        ));
                    }
                }
            }
        }
        kind => check_sql_syntax(trimmed, kind)?,
    }

    Ok(())
}

/// Check parenthesis nesting stays balanced and within the depth limit.
fn check_nesting_depth(query: &str, max_depth: usize) -> GatewayResult<()> {
    let mut depth: usize = 0;
    for ch in query.chars() {
        match ch {
            '(' => {
                depth += 1;
                if depth > max_depth {
                    return Err(GatewayError::validation(format!(
                        "Query nesting exceeds maximum depth of {}",
                        max_depth
                    )));
                }
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// Dialect-specific dangerous-pattern detection for default connections.
fn check_dangerous_patterns(query: &str, kind: DatabaseKind) -> GatewayResult<()> {
    let base: &[DangerousPattern] = match kind {
        DatabaseKind::MongoDb => &[],
        _ => SQL_PATTERNS,
    };
    let extra: &[DangerousPattern] = match kind {
        DatabaseKind::PostgreSql => POSTGRES_PATTERNS,
        DatabaseKind::MySql => MYSQL_PATTERNS,
        DatabaseKind::MongoDb => MONGO_PATTERNS,
    };
    for pattern in base.iter().chain(extra) {
        if pattern.regex.is_match(query) {
            return Err(GatewayError::validation(format!(
                "Query blocked on shared connection: {}",
                pattern.reason
            )));
        }
    }
    Ok(())
}

/// Dialect syntactic check.
///
/// DDL that the parser cannot handle is accepted, so engines that outrun the
/// parser's grammar still work.
fn check_sql_syntax(query: &str, kind: DatabaseKind) -> GatewayResult<()> {
    let dialect: Box<dyn Dialect> = match kind {
        DatabaseKind::PostgreSql => Box::new(PostgreSqlDialect {}),
        DatabaseKind::MySql => Box::new(MySqlDialect {}),
        DatabaseKind::MongoDb => Box::new(GenericDialect {}),
    };
    match Parser::parse_sql(dialect.as_ref(), query) {
        Ok(_) => Ok(()),
        Err(_) if DDL_PREFIX.is_match(query) => Ok(()),
        Err(e) => Err(GatewayError::validation(format!(
            "SQL syntax error: {} (check quotes, matching braces and statement keywords)",
            e
        ))),
    }
}

/// Extract database names referenced by a MySQL statement.
///
/// Used on isolated sessions to refuse exports that reach outside the
/// tenant's database. Unparseable statements yield an empty set (the
/// syntactic check runs separately).
pub fn referenced_mysql_databases(query: &str) -> Vec<String> {
    let Ok(statements) = Parser::parse_sql(&MySqlDialect {}, query) else {
        return Vec::new();
    };
    let mut databases = Vec::new();
    let _ = visit_relations(&statements, |relation| {
        if relation.0.len() >= 2 {
            let db = relation.0[0].value.clone();
            if !databases.contains(&db) {
                databases.push(db);
            }
        }
        ControlFlow::<()>::Continue(())
    });
    databases
}

/// Refuse a query on an isolated session that touches a foreign database.
pub fn enforce_isolation(
    query: &str,
    user_database: &str,
    selected_database: Option<&str>,
) -> GatewayResult<()> {
    for db in referenced_mysql_databases(query) {
        let allowed = db == user_database || Some(db.as_str()) == selected_database;
        if !allowed {
            return Err(GatewayError::forbidden(format!(
                "Query references database '{}' outside the session scope",
                db
            )));
        }
    }
    Ok(())
}

static DESTRUCTIVE_DROP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*drop\s+(database|schema|table|view|index|function|procedure|trigger)\b")
        .unwrap()
});
static DESTRUCTIVE_TRUNCATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*truncate\s+table\b").unwrap());
static DESTRUCTIVE_DELETE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*delete\s+from\b").unwrap());
static DELETE_NOOP_GUARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bwhere\s+1\s*=\s*0\b").unwrap());

/// Detect a destructive SQL statement for simulation on default connections.
///
/// Returns the operation label (e.g. "DROP TABLE") when the statement would
/// destroy data; `DELETE FROM ... WHERE 1=0` is exempt.
pub fn detect_destructive_statement(sql: &str) -> Option<String> {
    if let Some(captures) = DESTRUCTIVE_DROP.captures(sql) {
        return Some(format!("DROP {}", captures[1].to_uppercase()));
    }
    if DESTRUCTIVE_TRUNCATE.is_match(sql) {
        return Some("TRUNCATE TABLE".to_string());
    }
    if DESTRUCTIVE_DELETE.is_match(sql) && !DELETE_NOOP_GUARD.is_match(sql) {
        return Some("DELETE FROM".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_ctx(default_connection: bool) -> ValidationContext {
        ValidationContext::new(DatabaseKind::PostgreSql, default_connection)
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(validate_query("   ", &sql_ctx(false)).is_err());
    }

    #[test]
    fn test_length_limit() {
        let ctx = sql_ctx(false).with_limits(10, 10);
        assert!(validate_query("SELECT 11111111", &ctx).is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let ctx = sql_ctx(false).with_limits(100_000, 3);
        assert!(validate_query("SELECT ((((1))))", &ctx).is_err());
        assert!(validate_query("SELECT (((1)))", &ctx).is_ok());
    }

    #[test]
    fn test_plain_select_allowed() {
        assert!(validate_query("SELECT * FROM users WHERE id = 1", &sql_ctx(true)).is_ok());
    }

    #[test]
    fn test_chained_drop_blocked_on_default() {
        let q = "SELECT 1; DROP TABLE users";
        assert!(validate_query(q, &sql_ctx(true)).is_err());
        // The same text passes on a private connection
        assert!(validate_query(q, &sql_ctx(false)).is_ok());
    }

    #[test]
    fn test_comments_blocked_on_default() {
        assert!(validate_query("SELECT 1 -- sneak", &sql_ctx(true)).is_err());
        assert!(validate_query("SELECT /* x */ 1", &sql_ctx(true)).is_err());
    }

    #[test]
    fn test_grant_revoke_blocked_on_default() {
        assert!(validate_query("GRANT ALL ON t TO u", &sql_ctx(true)).is_err());
        assert!(validate_query("REVOKE ALL ON t FROM u", &sql_ctx(true)).is_err());
    }

    #[test]
    fn test_pg_file_access_blocked_on_default() {
        assert!(validate_query("SELECT pg_read_file('/etc/passwd')", &sql_ctx(true)).is_err());
        assert!(
            validate_query("COPY t FROM PROGRAM 'cat /etc/passwd'", &sql_ctx(true)).is_err()
        );
    }

    #[test]
    fn test_mysql_outfile_blocked_on_default() {
        let ctx = ValidationContext::new(DatabaseKind::MySql, true);
        assert!(validate_query("SELECT * FROM t INTO OUTFILE '/tmp/x'", &ctx).is_err());
        assert!(validate_query("LOAD DATA INFILE '/tmp/x' INTO TABLE t", &ctx).is_err());
    }

    #[test]
    fn test_syntax_error_reported_with_hint() {
        let err = validate_query("SELEC * FORM t", &sql_ctx(false)).unwrap_err();
        assert!(err.to_string().contains("check quotes"));
    }

    #[test]
    fn test_unparseable_ddl_accepted() {
        // Engine-specific DDL the dialect parser may not know still validates.
        let q = "CREATE INDEX CONCURRENTLY IF NOT EXISTS idx ON t USING brin (v) WITH (pages_per_range = 32)";
        assert!(validate_query(q, &sql_ctx(false)).is_ok());
    }

    #[test]
    fn test_mongo_where_blocked_on_default() {
        let ctx = ValidationContext::new(DatabaseKind::MongoDb, true);
        assert!(validate_query("db.users.find({$where: \"1\"})", &ctx).is_err());
        assert!(validate_query("db.runCommand({ping: 1})", &ctx).is_err());
    }

    #[test]
    fn test_mongo_find_allowed() {
        let ctx = ValidationContext::new(DatabaseKind::MongoDb, true);
        assert!(validate_query("db.users.find({age: {$gt: 10}})", &ctx).is_ok());
    }

    #[test]
    fn test_referenced_databases_extracted() {
        let dbs = referenced_mysql_databases("SELECT * FROM other_db.sales s JOIN mine.t USING (id)");
        assert_eq!(dbs, vec!["other_db".to_string(), "mine".to_string()]);
    }

    #[test]
    fn test_unqualified_tables_have_no_database() {
        assert!(referenced_mysql_databases("SELECT * FROM sales").is_empty());
    }

    #[test]
    fn test_enforce_isolation() {
        assert!(enforce_isolation("SELECT * FROM u_abc.t", "u_abc", None).is_ok());
        assert!(enforce_isolation("SELECT * FROM picked.t", "u_abc", Some("picked")).is_ok());
        let err = enforce_isolation("SELECT * FROM other_db.sales", "u_abc", None).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_detect_destructive_drop() {
        assert_eq!(
            detect_destructive_statement("DROP TABLE users"),
            Some("DROP TABLE".to_string())
        );
        assert_eq!(
            detect_destructive_statement("  drop database app"),
            Some("DROP DATABASE".to_string())
        );
        assert_eq!(
            detect_destructive_statement("DROP VIEW v"),
            Some("DROP VIEW".to_string())
        );
    }

    #[test]
    fn test_detect_destructive_truncate_and_delete() {
        assert_eq!(
            detect_destructive_statement("TRUNCATE TABLE t"),
            Some("TRUNCATE TABLE".to_string())
        );
        assert_eq!(
            detect_destructive_statement("DELETE FROM t"),
            Some("DELETE FROM".to_string())
        );
        assert_eq!(detect_destructive_statement("DELETE FROM t WHERE 1=0"), None);
        assert_eq!(detect_destructive_statement("DELETE FROM t WHERE 1 = 0"), None);
    }

    #[test]
    fn test_detect_destructive_ignores_selects() {
        assert_eq!(detect_destructive_statement("SELECT 'DROP TABLE t'"), None);
    }
}
