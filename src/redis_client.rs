//! Redis key/value client.
//!
//! A thin wrapper over the `redis` crate providing a lazily-created
//! multiplexed connection with bounded retry. The gateway stores only
//! rate-limit counters; every value is JSON with an explicit TTL.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl RedisStore {
    /// Create a store for the given URL. The connection is established on
    /// first use, not here.
    pub fn new(url: &str, retry_attempts: u32, retry_delay: Duration) -> GatewayResult<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            GatewayError::unavailable(format!("Invalid Redis URL: {}", e))
        })?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            retry_attempts: retry_attempts.max(1),
            retry_delay,
        })
    }

    /// Get the live connection, creating it with bounded retry if needed.
    async fn connection(&self) -> GatewayResult<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let mut last_err = None;
        for attempt in 1..=self.retry_attempts {
            match self.client.get_multiplexed_async_connection().await {
                Ok(conn) => {
                    debug!(attempt, "Connected to Redis");
                    *guard = Some(conn.clone());
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Redis connection attempt failed");
                    last_err = Some(e);
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(last_err
            .map(GatewayError::from)
            .unwrap_or_else(|| GatewayError::unavailable("Redis connection failed")))
    }

    /// Drop the cached connection so the next call reconnects.
    async fn invalidate(&self) {
        *self.connection.lock().await = None;
    }

    /// Read a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> GatewayResult<Option<T>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = match conn.get(key).await {
            Ok(v) => v,
            Err(e) => {
                self.invalidate().await;
                return Err(e.into());
            }
        };
        match raw {
            Some(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|e| GatewayError::internal(format!("Corrupt value at {}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// Write a JSON value with a TTL. The TTL is clamped to at least one
    /// second so a record never outlives its window unbounded.
    pub async fn set_json_ex<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> GatewayResult<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| GatewayError::internal(format!("Serialize failed: {}", e)))?;
        let mut conn = self.connection().await?;
        let result: Result<(), redis::RedisError> =
            conn.set_ex(key, raw, ttl_secs.max(1)).await;
        if let Err(e) = result {
            self.invalidate().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Ping the store. Used by the health surface at startup.
    pub async fn ping(&self) -> GatewayResult<()> {
        let mut conn = self.connection().await?;
        let result: Result<String, redis::RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.invalidate().await;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        let result = RedisStore::new("not-a-url", 3, Duration::from_millis(10));
        assert!(result.is_err());
    }

    #[test]
    fn test_valid_url_accepted_without_connecting() {
        // No Redis server required: the connection is lazy.
        let store = RedisStore::new("redis://localhost:6399", 3, Duration::from_millis(10));
        assert!(store.is_ok());
    }

    #[test]
    fn test_retry_attempts_floor() {
        let store = RedisStore::new("redis://localhost:6399", 0, Duration::from_millis(10)).unwrap();
        assert_eq!(store.retry_attempts, 1);
    }
}
