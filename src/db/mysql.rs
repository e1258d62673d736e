//! MySQL adapter.
//!
//! Mirrors the PostgreSQL adapter with MySQL-specific introspection,
//! backtick identifier quoting, and `USE` database selection with strict
//! name validation.

use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySql, MySqlPool, Row, Transaction};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::AdapterSettings;
use crate::db::postgres::{POOL_CONNECT_TIMEOUT_SECS, POOL_IDLE_TIMEOUT_SECS, POOL_MAX_CONNECTIONS};
use crate::db::types::RowToJson;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{ColumnInfo, DatabaseKind, QueryOptions, QueryResult, TableInfo, TableType};
use crate::query::{
    apply_pagination, detect_destructive_statement, is_select_like, rewrite_as_explain,
    split_statements,
};

/// Databases hidden from listings and protected from cleanup.
const SYSTEM_DATABASES: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

static DATABASE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

pub struct MySqlAdapter {
    pool: RwLock<Option<MySqlPool>>,
    transaction: Mutex<Option<Transaction<'static, MySql>>>,
    settings: AdapterSettings,
    is_default_connection: bool,
}

impl MySqlAdapter {
    pub fn new(settings: AdapterSettings, is_default_connection: bool) -> Self {
        Self {
            pool: RwLock::new(None),
            transaction: Mutex::new(None),
            settings,
            is_default_connection,
        }
    }

    pub async fn connect(&self, connection_url: &str) -> GatewayResult<()> {
        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .idle_timeout(std::time::Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .acquire_timeout(std::time::Duration::from_secs(POOL_CONNECT_TIMEOUT_SECS))
            .connect(connection_url)
            .await
            .map_err(|e| GatewayError::execution(format!("MySQL connect failed: {}", e)))?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        *self.pool.write().await = Some(pool);
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(tx) = self.transaction.lock().await.take() {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback during disconnect failed");
            }
        }
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    async fn pool(&self) -> GatewayResult<MySqlPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| GatewayError::execution("Not connected to MySQL"))
    }

    pub async fn server_version(&self) -> GatewayResult<String> {
        let pool = self.pool().await?;
        let version: String = sqlx::query_scalar("SELECT version()").fetch_one(&pool).await?;
        Ok(version)
    }

    /// Health ping. On failure the pool is closed so the session's next
    /// request fails cleanly.
    pub async fn ping(&self) -> bool {
        let Ok(pool) = self.pool().await else {
            return false;
        };
        match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "MySQL health check failed; closing pool");
                if let Some(pool) = self.pool.write().await.take() {
                    pool.close().await;
                }
                false
            }
        }
    }

    /// Execute a SQL buffer. Multi-statement buffers run sequentially on one
    /// connection; the last statement's result is returned.
    pub async fn execute_query(
        &self,
        sql: &str,
        database: Option<&str>,
        options: &QueryOptions,
    ) -> GatewayResult<QueryResult> {
        let start = Instant::now();

        if self.is_default_connection && !options.allow_destructive {
            if let Some(operation) = detect_destructive_statement(sql) {
                info!(operation = %operation, "Simulating destructive statement");
                return Ok(QueryResult::simulated(
                    &operation,
                    start.elapsed().as_millis() as u64,
                ));
            }
        }

        let statements = split_statements(sql);
        if statements.is_empty() {
            return Err(GatewayError::validation("Query is empty"));
        }

        let mut tx_guard = self.transaction.lock().await;
        if let Some(tx) = tx_guard.as_mut() {
            if let Some(db) = database {
                use_database(&mut **tx, db).await?;
            }
            self.run_statements(&mut **tx, &statements, options, start).await
        } else {
            drop(tx_guard);
            let pool = self.pool().await?;
            let mut conn = pool.acquire().await?;
            if let Some(db) = database {
                use_database(&mut *conn, db).await?;
            }
            self.run_statements(&mut *conn, &statements, options, start).await
        }
    }

    async fn run_statements(
        &self,
        conn: &mut sqlx::MySqlConnection,
        statements: &[String],
        options: &QueryOptions,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        let mut result = None;
        let single = statements.len() == 1;
        for statement in statements {
            let statement = if single && options.explain && is_select_like(statement) {
                rewrite_as_explain(statement, DatabaseKind::MySql)
            } else if single {
                match options.effective_limit(self.settings.default_limit) {
                    Some(limit) => apply_pagination(
                        statement,
                        Some(limit),
                        options.offset,
                        self.settings.default_limit,
                    ),
                    None => statement.clone(),
                }
            } else {
                statement.clone()
            };
            result = Some(self.run_one(conn, &statement, start).await?);
        }
        result.ok_or_else(|| GatewayError::validation("Query is empty"))
    }

    async fn run_one(
        &self,
        conn: &mut sqlx::MySqlConnection,
        sql: &str,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        debug!(sql = %sql, "Executing MySQL statement");
        let budget = self.settings.query_timeout;

        if is_select_like(sql) {
            let rows = match timeout(budget, sqlx::query(sql).fetch_all(&mut *conn)).await {
                Ok(rows) => rows?,
                Err(_) => {
                    return Err(GatewayError::cancelled(
                        "query execution",
                        start.elapsed().as_millis() as u64,
                    ))
                }
            };
            let columns = rows.first().map(|r| r.column_meta()).unwrap_or_default();
            let json_rows = rows.iter().map(|r| r.to_json_map()).collect();
            Ok(QueryResult::from_rows(
                json_rows,
                columns,
                start.elapsed().as_millis() as u64,
            ))
        } else {
            let outcome = match timeout(budget, sqlx::query(sql).execute(&mut *conn)).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    return Err(GatewayError::cancelled(
                        "query execution",
                        start.elapsed().as_millis() as u64,
                    ))
                }
            };
            let mut row = serde_json::Map::new();
            row.insert("acknowledged".into(), JsonValue::Bool(true));
            row.insert(
                "affectedRows".into(),
                JsonValue::Number(outcome.rows_affected().into()),
            );
            if outcome.last_insert_id() > 0 {
                row.insert(
                    "insertId".into(),
                    JsonValue::Number(outcome.last_insert_id().into()),
                );
            }
            Ok(QueryResult::command(row, start.elapsed().as_millis() as u64))
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn begin_transaction(&self) -> GatewayResult<()> {
        let mut guard = self.transaction.lock().await;
        if guard.is_some() {
            return Err(GatewayError::validation("A transaction is already active"));
        }
        let pool = self.pool().await?;
        *guard = Some(pool.begin().await?);
        info!("Transaction started (MySQL)");
        Ok(())
    }

    pub async fn commit_transaction(&self) -> GatewayResult<()> {
        let tx = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or_else(|| GatewayError::validation("No active transaction"))?;
        tx.commit().await?;
        info!("Transaction committed (MySQL)");
        Ok(())
    }

    pub async fn rollback_transaction(&self) -> GatewayResult<()> {
        let tx = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or_else(|| GatewayError::validation("No active transaction"))?;
        tx.rollback().await?;
        info!("Transaction rolled back (MySQL)");
        Ok(())
    }

    pub async fn is_transaction_active(&self) -> bool {
        self.transaction.lock().await.is_some()
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// List non-system databases.
    pub async fn get_databases(&self) -> GatewayResult<Vec<String>> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SHOW DATABASES").fetch_all(&pool).await?;
        Ok(rows
            .iter()
            .map(|r| r.get::<String, _>(0))
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .collect())
    }

    /// List tables and views in a database.
    pub async fn get_tables(&self, database: &str) -> GatewayResult<Vec<TableInfo>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT
                CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
                CONVERT(TABLE_TYPE USING utf8) AS TABLE_TYPE
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ?
              AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
            ORDER BY TABLE_NAME
            "#,
        )
        .bind(database)
        .fetch_all(&pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                TableInfo::new(
                    row.get::<String, _>("TABLE_NAME"),
                    TableType::parse(&row.get::<String, _>("TABLE_TYPE")),
                )
            })
            .collect())
    }

    /// List columns of a table with nullability and primary-key membership.
    pub async fn get_columns(&self, database: &str, table: &str) -> GatewayResult<Vec<ColumnInfo>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT
                CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
                CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
                CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
                CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY
            FROM information_schema.COLUMNS
            WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .bind(database)
        .fetch_all(&pool)
        .await?;

        if rows.is_empty() {
            return Err(GatewayError::execution(format!(
                "Table '{}' not found in database '{}'",
                table, database
            )));
        }

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get("COLUMN_NAME"),
                type_name: row.get("COLUMN_TYPE"),
                nullable: row.get::<String, _>("IS_NULLABLE") == "YES",
                primary_key: row.get::<String, _>("COLUMN_KEY") == "PRI",
            })
            .collect())
    }

    // =========================================================================
    // Tenant provisioning & cleanup
    // =========================================================================

    /// Create a database if it does not already exist.
    pub async fn ensure_database(&self, database: &str) -> GatewayResult<()> {
        if !DATABASE_NAME.is_match(database) {
            return Err(GatewayError::validation(format!(
                "Invalid database name '{}'",
                database
            )));
        }
        let pool = self.pool().await?;
        sqlx::query(&format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            quote_identifier(database)
        ))
        .execute(&pool)
        .await?;
        info!(database = %database, "Ensured MySQL database");
        Ok(())
    }

    /// Drop one database.
    pub async fn cleanup_database(&self, database: &str) -> GatewayResult<()> {
        let pool = self.pool().await?;
        sqlx::query(&format!(
            "DROP DATABASE IF EXISTS {}",
            quote_identifier(database)
        ))
        .execute(&pool)
        .await?;
        info!(database = %database, "Dropped MySQL database");
        Ok(())
    }

    /// Drop every non-system database. Per-database errors are logged and do
    /// not abort the loop. Returns the names that were dropped.
    pub async fn drop_all_user_databases(&self) -> GatewayResult<Vec<String>> {
        let names = self.get_databases().await?;
        let mut dropped = Vec::new();
        for name in names {
            match self.cleanup_database(&name).await {
                Ok(()) => dropped.push(name),
                Err(e) => warn!(database = %name, error = %e, "Failed to drop database"),
            }
        }
        Ok(dropped)
    }
}

/// Select a database on a connection after validating its name.
async fn use_database(conn: &mut sqlx::MySqlConnection, database: &str) -> GatewayResult<()> {
    if !DATABASE_NAME.is_match(database) {
        return Err(GatewayError::validation(format!(
            "Invalid database name '{}'",
            database
        )));
    }
    sqlx::query(&format!("USE {}", quote_identifier(database)))
        .execute(conn)
        .await?;
    Ok(())
}

/// Backtick-quote an identifier, escaping embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
