//! Database adapters.
//!
//! One adapter variant per engine, each exposing the same capability set:
//! connect/disconnect, query execution, schema inspection, transactions and
//! tenant cleanup. Adapter instances are exclusively owned by a session and
//! are not shared across sessions.

pub mod mongo;
pub mod mysql;
pub mod postgres;
pub mod types;

pub use mongo::MongoAdapter;
pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;

use crate::config::AdapterSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{ColumnInfo, DatabaseKind, QueryOptions, QueryResult, TableInfo};

/// A live engine connection bound to a session.
pub enum Adapter {
    Postgres(PostgresAdapter),
    MySql(MySqlAdapter),
    Mongo(MongoAdapter),
}

impl Adapter {
    /// Instantiate a disconnected adapter for the given engine kind.
    pub fn new(kind: DatabaseKind, settings: AdapterSettings, is_default_connection: bool) -> Self {
        match kind {
            DatabaseKind::PostgreSql => {
                Self::Postgres(PostgresAdapter::new(settings, is_default_connection))
            }
            DatabaseKind::MySql => Self::MySql(MySqlAdapter::new(settings, is_default_connection)),
            DatabaseKind::MongoDb => Self::Mongo(MongoAdapter::new(settings, is_default_connection)),
        }
    }

    pub fn kind(&self) -> DatabaseKind {
        match self {
            Self::Postgres(_) => DatabaseKind::PostgreSql,
            Self::MySql(_) => DatabaseKind::MySql,
            Self::Mongo(_) => DatabaseKind::MongoDb,
        }
    }

    pub async fn connect(&self, connection_url: &str) -> GatewayResult<()> {
        match self {
            Self::Postgres(a) => a.connect(connection_url).await,
            Self::MySql(a) => a.connect(connection_url).await,
            Self::Mongo(a) => a.connect(connection_url).await,
        }
    }

    pub async fn disconnect(&self) {
        match self {
            Self::Postgres(a) => a.disconnect().await,
            Self::MySql(a) => a.disconnect().await,
            Self::Mongo(a) => a.disconnect().await,
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self {
            Self::Postgres(a) => a.is_connected().await,
            Self::MySql(a) => a.is_connected().await,
            Self::Mongo(a) => a.is_connected().await,
        }
    }

    pub async fn server_version(&self) -> GatewayResult<String> {
        match self {
            Self::Postgres(a) => a.server_version().await,
            Self::MySql(a) => a.server_version().await,
            Self::Mongo(a) => a.server_version().await,
        }
    }

    /// Health ping; SQL adapters close their pool on failure so the next
    /// request fails cleanly.
    pub async fn ping(&self) -> bool {
        match self {
            Self::Postgres(a) => a.ping().await,
            Self::MySql(a) => a.ping().await,
            Self::Mongo(a) => a.ping().await,
        }
    }

    pub async fn execute_query(
        &self,
        query: &str,
        database: Option<&str>,
        options: &QueryOptions,
    ) -> GatewayResult<QueryResult> {
        match self {
            Self::Postgres(a) => a.execute_query(query, database, options).await,
            Self::MySql(a) => a.execute_query(query, database, options).await,
            Self::Mongo(a) => a.execute_query(query, database, options).await,
        }
    }

    pub async fn get_databases(&self) -> GatewayResult<Vec<String>> {
        match self {
            Self::Postgres(a) => a.get_databases().await,
            Self::MySql(a) => a.get_databases().await,
            Self::Mongo(a) => a.get_databases().await,
        }
    }

    pub async fn get_tables(&self, database: &str) -> GatewayResult<Vec<TableInfo>> {
        match self {
            Self::Postgres(a) => a.get_tables(database).await,
            Self::MySql(a) => a.get_tables(database).await,
            Self::Mongo(a) => a.get_tables(database).await,
        }
    }

    pub async fn get_columns(&self, database: &str, table: &str) -> GatewayResult<Vec<ColumnInfo>> {
        match self {
            Self::Postgres(a) => a.get_columns(database, table).await,
            Self::MySql(a) => a.get_columns(database, table).await,
            Self::Mongo(a) => a.get_columns(database, table).await,
        }
    }

    pub async fn begin_transaction(&self) -> GatewayResult<()> {
        match self {
            Self::Postgres(a) => a.begin_transaction().await,
            Self::MySql(a) => a.begin_transaction().await,
            Self::Mongo(a) => a.begin_transaction().await,
        }
    }

    pub async fn commit_transaction(&self) -> GatewayResult<()> {
        match self {
            Self::Postgres(a) => a.commit_transaction().await,
            Self::MySql(a) => a.commit_transaction().await,
            Self::Mongo(a) => a.commit_transaction().await,
        }
    }

    pub async fn rollback_transaction(&self) -> GatewayResult<()> {
        match self {
            Self::Postgres(a) => a.rollback_transaction().await,
            Self::MySql(a) => a.rollback_transaction().await,
            Self::Mongo(a) => a.rollback_transaction().await,
        }
    }

    pub async fn is_transaction_active(&self) -> bool {
        match self {
            Self::Postgres(a) => a.is_transaction_active().await,
            Self::MySql(a) => a.is_transaction_active().await,
            Self::Mongo(a) => a.is_transaction_active().await,
        }
    }

    /// Create a database if missing. SQL engines only; used by isolation
    /// provisioning.
    pub async fn ensure_database(&self, database: &str) -> GatewayResult<()> {
        match self {
            Self::Postgres(a) => a.ensure_database(database).await,
            Self::MySql(a) => a.ensure_database(database).await,
            Self::Mongo(_) => Err(GatewayError::validation(
                "Database provisioning is not supported for MongoDB",
            )),
        }
    }

    pub async fn cleanup_database(&self, database: &str) -> GatewayResult<()> {
        match self {
            Self::Postgres(a) => a.cleanup_database(database).await,
            Self::MySql(a) => a.cleanup_database(database).await,
            Self::Mongo(a) => a.cleanup_database(database).await,
        }
    }

    pub async fn drop_all_user_databases(&self) -> GatewayResult<Vec<String>> {
        match self {
            Self::Postgres(a) => a.drop_all_user_databases().await,
            Self::MySql(a) => a.drop_all_user_databases().await,
            Self::Mongo(a) => a.drop_all_user_databases().await,
        }
    }
}
