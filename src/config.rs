//! Configuration handling for the query gateway.
//!
//! Configuration is environment-first: every option can be supplied via
//! environment variables, with CLI flags available for local development.

use std::time::Duration;

use clap::Parser;

use crate::models::{DatabaseKind, DefaultDatabaseConfig};

/// Default HTTP host.
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default per-query timeout in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 30_000;

/// Default row cap applied when the client does not set a limit.
pub const DEFAULT_QUERY_LIMIT: u32 = 1_000;

/// Default number of documents sampled for Mongo field inference.
pub const DEFAULT_MONGO_SAMPLE_SIZE: u32 = 100;

/// Default idle timeout before a session is evicted.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30 * 60 * 1000;

/// Minimum length for shared secrets (admin token, extend code).
pub const MIN_SECRET_LENGTH: usize = 8;

/// Configuration for the query gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "query-gateway",
    about = "Multi-tenant query gateway for PostgreSQL, MySQL and MongoDB",
    version
)]
pub struct Config {
    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "GATEWAY_HOST")]
    pub host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "GATEWAY_PORT")]
    pub port: u16,

    /// Redis connection URL (rate limiting)
    #[arg(long, default_value = "redis://localhost:6379", env = "REDIS_URL")]
    pub redis_url: String,

    /// Number of Redis connection attempts before giving up
    #[arg(long, default_value_t = 3, env = "REDIS_RETRY_ATTEMPTS")]
    pub redis_retry_attempts: u32,

    /// Delay between Redis connection attempts in milliseconds
    #[arg(long, default_value_t = 1000, env = "REDIS_RETRY_DELAY_MS")]
    pub redis_retry_delay_ms: u64,

    /// Default PostgreSQL connection URL offered to clients
    #[arg(long, env = "DB_POSTGRESQL_URL")]
    pub postgresql_url: Option<String>,

    /// Display name for the default PostgreSQL connection
    #[arg(long, env = "DB_POSTGRESQL_NAME")]
    pub postgresql_name: Option<String>,

    /// Default MySQL connection URL offered to clients
    #[arg(long, env = "DB_MYSQL_URL")]
    pub mysql_url: Option<String>,

    /// Display name for the default MySQL connection
    #[arg(long, env = "DB_MYSQL_NAME")]
    pub mysql_name: Option<String>,

    /// Default MongoDB connection URL offered to clients
    #[arg(long, env = "DB_MONGODB_URL")]
    pub mongodb_url: Option<String>,

    /// Display name for the default MongoDB connection
    #[arg(long, env = "DB_MONGODB_NAME")]
    pub mongodb_name: Option<String>,

    /// Per-query timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_MS, env = "QUERY_TIMEOUT_MS")]
    pub query_timeout_ms: u64,

    /// Default row cap for query results
    #[arg(long, default_value_t = DEFAULT_QUERY_LIMIT, env = "QUERY_DEFAULT_LIMIT")]
    pub query_default_limit: u32,

    /// Documents sampled when inferring Mongo collection fields
    #[arg(long, default_value_t = DEFAULT_MONGO_SAMPLE_SIZE, env = "MONGO_SCHEMA_SAMPLE_SIZE")]
    pub mongo_schema_sample_size: u32,

    /// Query rate limit (requests per window per client IP)
    #[arg(long, default_value_t = 100, env = "RATE_LIMIT_QUERY_MAX")]
    pub rate_limit_query_max: u32,

    /// Connection rate limit (requests per window per client IP)
    #[arg(long, default_value_t = 20, env = "RATE_LIMIT_CONNECTION_MAX")]
    pub rate_limit_connection_max: u32,

    /// Idle timeout before a session is evicted, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SESSION_TIMEOUT_MS, env = "SESSION_TIMEOUT_MS")]
    pub session_timeout_ms: u64,

    /// Maximum accepted query length in characters
    #[arg(long, default_value_t = 100_000, env = "MAX_QUERY_LENGTH")]
    pub max_query_length: usize,

    /// Maximum parenthesis nesting depth in a query
    #[arg(long, default_value_t = 10, env = "MAX_NESTED_DEPTH")]
    pub max_nested_depth: usize,

    /// Shared secret gating the admin cleanup endpoint
    #[arg(long, env = "ADMIN_CLEANUP_TOKEN")]
    pub admin_cleanup_token: Option<String>,

    /// Shared secret gating the session-extend endpoint
    #[arg(long, env = "APP_EXTEND_CODE")]
    pub app_extend_code: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "GATEWAY_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self::parse_from(["query-gateway"])
    }

    /// Get the HTTP bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the per-query timeout as a Duration.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Get the session idle timeout as a Duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Derive the immutable default-connection list from the environment.
    ///
    /// Only kinds with a URL set are present. URLs are never serialized to
    /// clients.
    pub fn default_databases(&self) -> Vec<DefaultDatabaseConfig> {
        let mut defaults = Vec::new();
        let entries = [
            (
                DatabaseKind::PostgreSql,
                &self.postgresql_url,
                &self.postgresql_name,
            ),
            (DatabaseKind::MySql, &self.mysql_url, &self.mysql_name),
            (DatabaseKind::MongoDb, &self.mongodb_url, &self.mongodb_name),
        ];
        for (kind, url, name) in entries {
            if let Some(url) = url {
                defaults.push(DefaultDatabaseConfig {
                    kind,
                    url: url.clone(),
                    display_name: name.clone().unwrap_or_else(|| kind.display_name().into()),
                });
            }
        }
        defaults
    }

    /// Validate configured shared secrets. Secrets must be at least
    /// [`MIN_SECRET_LENGTH`] characters when set.
    pub fn validate_secrets(&self) -> Result<(), String> {
        for (name, value) in [
            ("ADMIN_CLEANUP_TOKEN", &self.admin_cleanup_token),
            ("APP_EXTEND_CODE", &self.app_extend_code),
        ] {
            if let Some(secret) = value {
                if secret.len() < MIN_SECRET_LENGTH {
                    return Err(format!(
                        "{} must be at least {} characters",
                        name, MIN_SECRET_LENGTH
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Execution settings shared by every adapter instance.
#[derive(Debug, Clone, Copy)]
pub struct AdapterSettings {
    pub query_timeout: Duration,
    pub default_limit: u32,
    pub schema_sample_size: u32,
}

impl AdapterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            query_timeout: config.query_timeout(),
            default_limit: config.query_default_limit,
            schema_sample_size: config.mongo_schema_sample_size,
        }
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
            default_limit: DEFAULT_QUERY_LIMIT,
            schema_sample_size: DEFAULT_MONGO_SAMPLE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert_eq!(config.host, DEFAULT_HTTP_HOST);
        assert_eq!(config.port, DEFAULT_HTTP_PORT);
        assert_eq!(config.query_timeout_ms, DEFAULT_QUERY_TIMEOUT_MS);
        assert_eq!(config.query_default_limit, DEFAULT_QUERY_LIMIT);
        assert_eq!(config.max_query_length, 100_000);
        assert_eq!(config.max_nested_depth, 10);
    }

    #[test]
    fn test_bind_addr() {
        let mut config = Config::default_config();
        config.host = "0.0.0.0".into();
        config.port = 3000;
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_default_databases_empty_without_urls() {
        let config = Config::default_config();
        assert!(config.default_databases().is_empty());
    }

    #[test]
    fn test_default_databases_seeded() {
        let mut config = Config::default_config();
        config.postgresql_url = Some("postgres://localhost/app".into());
        config.mysql_url = Some("mysql://localhost/app".into());
        config.mysql_name = Some("Sales".into());

        let defaults = config.default_databases();
        assert_eq!(defaults.len(), 2);
        assert_eq!(defaults[0].kind, DatabaseKind::PostgreSql);
        assert_eq!(defaults[0].display_name, "PostgreSQL");
        assert_eq!(defaults[1].display_name, "Sales");
    }

    #[test]
    fn test_secret_length_validation() {
        let mut config = Config::default_config();
        assert!(config.validate_secrets().is_ok());

        config.admin_cleanup_token = Some("short".into());
        assert!(config.validate_secrets().is_err());

        config.admin_cleanup_token = Some("long-enough-token".into());
        config.app_extend_code = Some("12345678".into());
        assert!(config.validate_secrets().is_ok());
    }
}
