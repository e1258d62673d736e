//! PostgreSQL adapter.
//!
//! A bounded connection pool per session, a single dedicated transaction
//! handle, dialect-aware pagination/EXPLAIN rewriting, schema introspection
//! against the system catalogs, and destructive-operation simulation on
//! shared default connections.

use std::time::Instant;

use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::AdapterSettings;
use crate::db::types::RowToJson;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{ColumnInfo, DatabaseKind, QueryOptions, QueryResult, TableInfo, TableType};
use crate::query::{
    apply_pagination, detect_destructive_statement, is_select_like, rewrite_as_explain,
    split_statements,
};

/// Pool sizing shared by both SQL adapters.
pub const POOL_MAX_CONNECTIONS: u32 = 5;
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 30;
pub const POOL_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Schemas hidden from schema listings.
const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema"];

/// Databases never dropped by tenant cleanup.
const SYSTEM_DATABASES: &[&str] = &["postgres", "template0", "template1"];

pub struct PostgresAdapter {
    pool: RwLock<Option<PgPool>>,
    transaction: Mutex<Option<Transaction<'static, Postgres>>>,
    settings: AdapterSettings,
    is_default_connection: bool,
}

impl PostgresAdapter {
    pub fn new(settings: AdapterSettings, is_default_connection: bool) -> Self {
        Self {
            pool: RwLock::new(None),
            transaction: Mutex::new(None),
            settings,
            is_default_connection,
        }
    }

    /// Open the connection pool and verify it with a trivial query.
    pub async fn connect(&self, connection_url: &str) -> GatewayResult<()> {
        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .idle_timeout(std::time::Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .acquire_timeout(std::time::Duration::from_secs(POOL_CONNECT_TIMEOUT_SECS))
            .connect(connection_url)
            .await
            .map_err(|e| GatewayError::execution(format!("PostgreSQL connect failed: {}", e)))?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        *self.pool.write().await = Some(pool);
        Ok(())
    }

    /// Close the pool, rolling back any open transaction first.
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

    async fn pool(&self) -> GatewayResult<PgPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| GatewayError::execution("Not connected to PostgreSQL"))
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
                warn!(error = %e, "PostgreSQL health check failed; closing pool");
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
                set_search_path(&mut **tx, db).await?;
            }
            self.run_statements(&mut **tx, &statements, options, start).await
        } else {
            drop(tx_guard);
            let pool = self.pool().await?;
            let mut conn = pool.acquire().await?;
            sqlx::query(&format!(
                "SET statement_timeout = {}",
                self.settings.query_timeout.as_millis()
            ))
            .execute(&mut *conn)
            .await?;
            if let Some(db) = database {
                set_search_path(&mut *conn, db).await?;
            }
            self.run_statements(&mut *conn, &statements, options, start).await
        }
    }

    async fn run_statements(
        &self,
        conn: &mut sqlx::PgConnection,
        statements: &[String],
        options: &QueryOptions,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        let mut result = None;
        let single = statements.len() == 1;
        for statement in statements {
            let statement = if single && options.explain && is_select_like(statement) {
                rewrite_as_explain(statement, DatabaseKind::PostgreSql)
            } else if single {
                let limit = options.effective_limit(self.settings.default_limit);
                match limit {
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
        conn: &mut sqlx::PgConnection,
        sql: &str,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        debug!(sql = %sql, "Executing PostgreSQL statement");
        let budget = self.settings.query_timeout;

        if is_select_like(sql) || sql.to_lowercase().contains("returning") {
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
        info!("Transaction started (PostgreSQL)");
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
        info!("Transaction committed (PostgreSQL)");
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
        info!("Transaction rolled back (PostgreSQL)");
        Ok(())
    }

    pub async fn is_transaction_active(&self) -> bool {
        self.transaction.lock().await.is_some()
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// List non-system schemas.
    pub async fn get_databases(&self) -> GatewayResult<Vec<String>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT schema_name FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
              AND schema_name NOT LIKE 'pg_toast%'
              AND schema_name NOT LIKE 'pg_temp%'
            ORDER BY schema_name
            "#,
        )
        .fetch_all(&pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("schema_name")).collect())
    }

    /// List tables and views in a schema.
    pub async fn get_tables(&self, database: &str) -> GatewayResult<Vec<TableInfo>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT table_name, table_type
            FROM information_schema.tables
            WHERE table_schema = $1
              AND table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY table_name
            "#,
        )
        .bind(database)
        .fetch_all(&pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                TableInfo::new(
                    row.get::<String, _>("table_name"),
                    TableType::parse(&row.get::<String, _>("table_type")),
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
                c.column_name,
                c.data_type,
                c.is_nullable,
                CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END AS is_primary_key
            FROM information_schema.columns c
            LEFT JOIN (
                SELECT kcu.column_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                WHERE tc.table_name = $1
                  AND tc.table_schema = $2
                  AND tc.constraint_type = 'PRIMARY KEY'
            ) pk ON c.column_name = pk.column_name
            WHERE c.table_name = $1 AND c.table_schema = $2
            ORDER BY c.ordinal_position
            "#,
        )
        .bind(table)
        .bind(database)
        .fetch_all(&pool)
        .await?;

        if rows.is_empty() {
            return Err(GatewayError::execution(format!(
                "Table '{}' not found in schema '{}'",
                table, database
            )));
        }

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get("column_name"),
                type_name: row.get("data_type"),
                nullable: row.get::<String, _>("is_nullable") == "YES",
                primary_key: row.get("is_primary_key"),
            })
            .collect())
    }

    // =========================================================================
    // Tenant provisioning & cleanup
    // =========================================================================

    /// Create a database if it does not already exist.
    pub async fn ensure_database(&self, database: &str) -> GatewayResult<()> {
        let pool = self.pool().await?;
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
                .bind(database)
                .fetch_optional(&pool)
                .await?;
        if exists.is_none() {
            sqlx::query(&format!("CREATE DATABASE {}", quote_identifier(database)))
                .execute(&pool)
                .await?;
            info!(database = %database, "Created PostgreSQL database");
        }
        Ok(())
    }

    /// Drop one database, first terminating other connections to it.
    pub async fn cleanup_database(&self, database: &str) -> GatewayResult<()> {
        let pool = self.pool().await?;
        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(database)
        .execute(&pool)
        .await?;
        sqlx::query(&format!(
            "DROP DATABASE IF EXISTS {}",
            quote_identifier(database)
        ))
        .execute(&pool)
        .await?;
        info!(database = %database, "Dropped PostgreSQL database");
        Ok(())
    }

    /// Drop every non-system database. Per-database errors are logged and do
    /// not abort the loop. Returns the names that were dropped.
    pub async fn drop_all_user_databases(&self) -> GatewayResult<Vec<String>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname",
        )
        .fetch_all(&pool)
        .await?;

        let mut dropped = Vec::new();
        for row in rows {
            let name: String = row.get("datname");
            if SYSTEM_DATABASES.contains(&name.as_str()) {
                continue;
            }
            match self.cleanup_database(&name).await {
                Ok(()) => dropped.push(name),
                Err(e) => warn!(database = %name, error = %e, "Failed to drop database"),
            }
        }
        Ok(dropped)
    }
}

/// Apply `SET search_path TO "<database>", public` on a connection.
async fn set_search_path(conn: &mut sqlx::PgConnection, database: &str) -> GatewayResult<()> {
    sqlx::query(&format!(
        "SET search_path TO {}, public",
        quote_identifier(database)
    ))
    .execute(conn)
    .await?;
    Ok(())
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
