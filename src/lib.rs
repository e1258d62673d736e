//! Query Gateway Library
//!
//! A multi-tenant query gateway mediating browser access to PostgreSQL,
//! MySQL and MongoDB: per-session adapters, HMAC request signing, query
//! validation with destructive-operation simulation, Redis-backed rate
//! limiting, and scheduled tenant cleanup.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;
pub mod mongo;
pub mod query;
pub mod rate_limit;
pub mod redis_client;
pub mod scheduler;
pub mod session;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use session::SessionManager;
