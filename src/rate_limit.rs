//! Fixed-window rate limiting backed by Redis.
//!
//! Two limiter instances exist in the gateway: one for query traffic and one
//! for connection traffic, both keyed by client IP. Counters live in the
//! external store so limits hold across replicas; the fixed-window scheme
//! tolerates the small over-count a non-atomic read/write can introduce.
//! On storage failure the limiter fails open and the failure is logged.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::redis_client::RedisStore;

/// Window length for both limiter instances.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Stored counter for one client IP in the current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub count: u32,
    /// Window end, epoch milliseconds.
    pub reset_time: i64,
}

/// Outcome of a rate-limit check, carrying everything the HTTP layer needs
/// to decorate the response headers.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Window end, epoch seconds (RateLimit-Reset).
    pub reset_epoch_secs: i64,
    /// Seconds until retry is worthwhile; set only on denial.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    /// RateLimit-Policy header value, e.g. `100;w=60`.
    pub fn policy(&self) -> String {
        format!("{};w={}", self.limit, RATE_LIMIT_WINDOW.as_secs())
    }
}

pub struct RateLimiter {
    store: Arc<RedisStore>,
    prefix: &'static str,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<RedisStore>, prefix: &'static str, max_requests: u32) -> Self {
        Self {
            store,
            prefix,
            max_requests,
            window: RATE_LIMIT_WINDOW,
        }
    }

    /// Check and count one request from the given client IP.
    pub async fn check(&self, client_ip: &str) -> RateLimitDecision {
        let key = format!("{}:{}", self.prefix, client_ip);
        let now = chrono::Utc::now().timestamp_millis();

        let record = match self.store.get_json::<RateLimitRecord>(&key).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, key = %key, "Rate limit store read failed; allowing request");
                return self.fail_open(now);
            }
        };

        let record = match record {
            Some(r) if now <= r.reset_time => r,
            _ => RateLimitRecord {
                count: 0,
                reset_time: now + self.window.as_millis() as i64,
            },
        };

        if record.count >= self.max_requests {
            let retry_after = ((record.reset_time - now).max(0) as u64).div_ceil(1000).max(1);
            return RateLimitDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset_epoch_secs: record.reset_time / 1000,
                retry_after_secs: Some(retry_after),
            };
        }

        let updated = RateLimitRecord {
            count: record.count + 1,
            reset_time: record.reset_time,
        };
        // TTL is at least 1s even when the window is about to roll over.
        let ttl_secs = ((updated.reset_time - now).max(0) as u64).div_ceil(1000).max(1);
        if let Err(e) = self.store.set_json_ex(&key, &updated, ttl_secs).await {
            warn!(error = %e, key = %key, "Rate limit store write failed; allowing request");
            return self.fail_open(now);
        }

        RateLimitDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(updated.count),
            reset_epoch_secs: updated.reset_time / 1000,
            retry_after_secs: None,
        }
    }

    fn fail_open(&self, now: i64) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests,
            reset_epoch_secs: (now + self.window.as_millis() as i64) / 1000,
            retry_after_secs: None,
        }
    }
}

/// Resolve the client IP from proxy headers, preferring `x-forwarded-for`,
/// then `x-real-ip`, falling back to `"unknown"`.
pub fn client_ip(headers: &axum::http::HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_client_ip_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.1.2.3, 172.16.0.1".parse().unwrap());
        headers.insert("x-real-ip", "192.168.0.9".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.1.2.3");
    }

    #[test]
    fn test_client_ip_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "192.168.0.9".parse().unwrap());
        assert_eq!(client_ip(&headers), "192.168.0.9");
    }

    #[test]
    fn test_client_ip_unknown_fallback() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_policy_header_format() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 100,
            remaining: 99,
            reset_epoch_secs: 0,
            retry_after_secs: None,
        };
        assert_eq!(decision.policy(), "100;w=60");
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let record = RateLimitRecord {
            count: 7,
            reset_time: 1_700_000_060_000,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: RateLimitRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.count, 7);
        assert_eq!(back.reset_time, record.reset_time);
    }
}
