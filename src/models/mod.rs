//! Data models for the query gateway.

pub mod connection;
pub mod query;
pub mod schema;

pub use connection::{mask_url_credentials, DatabaseKind, DefaultDatabaseConfig};
pub use query::{ColumnMeta, QueryOptions, QueryResult, MAX_ROW_LIMIT};
pub use schema::{ColumnInfo, DatabaseInfo, TableInfo, TableType};
