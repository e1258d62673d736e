//! Integration tests for the Redis-backed rate limiter.
//!
//! These tests require a running Redis server. Set TEST_REDIS_URL to run
//! them, e.g. TEST_REDIS_URL="redis://localhost:6379".

use std::sync::Arc;
use std::time::Duration;

use query_gateway::rate_limit::RateLimiter;
use query_gateway::redis_client::RedisStore;

fn redis_url() -> Option<String> {
    match std::env::var("TEST_REDIS_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping test: TEST_REDIS_URL not set");
            None
        }
    }
}

fn unique_ip(tag: &str) -> String {
    // Distinct key per test run so windows never overlap between runs.
    format!("test-{}-{}", tag, std::process::id())
}

#[tokio::test]
async fn test_remaining_decreases_monotonically() {
    let Some(url) = redis_url() else { return };
    let store = Arc::new(RedisStore::new(&url, 3, Duration::from_millis(100)).unwrap());
    let limiter = RateLimiter::new(store, "rl:test:mono", 10);
    let ip = unique_ip("mono");

    let mut previous = u32::MAX;
    for _ in 0..5 {
        let decision = limiter.check(&ip).await;
        assert!(decision.allowed);
        assert!(decision.remaining < previous);
        previous = decision.remaining;
    }
}

#[tokio::test]
async fn test_denial_after_max_with_retry_after() {
    let Some(url) = redis_url() else { return };
    let store = Arc::new(RedisStore::new(&url, 3, Duration::from_millis(100)).unwrap());
    let limiter = RateLimiter::new(store, "rl:test:deny", 3);
    let ip = unique_ip("deny");

    for _ in 0..3 {
        assert!(limiter.check(&ip).await.allowed);
    }
    let denied = limiter.check(&ip).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    let retry_after = denied.retry_after_secs.unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
}

#[tokio::test]
async fn test_separate_ips_have_separate_windows() {
    let Some(url) = redis_url() else { return };
    let store = Arc::new(RedisStore::new(&url, 3, Duration::from_millis(100)).unwrap());
    let limiter = RateLimiter::new(store, "rl:test:iso", 2);

    let first = unique_ip("iso-a");
    let second = unique_ip("iso-b");
    assert!(limiter.check(&first).await.allowed);
    assert!(limiter.check(&first).await.allowed);
    assert!(!limiter.check(&first).await.allowed);
    // The other client is untouched.
    assert!(limiter.check(&second).await.allowed);
}

#[tokio::test]
async fn test_fail_open_when_store_unreachable() {
    // Port 1 is never a Redis server; connection fails and the limiter
    // must allow the request anyway.
    let store = Arc::new(
        RedisStore::new("redis://127.0.0.1:1", 1, Duration::from_millis(10)).unwrap(),
    );
    let limiter = RateLimiter::new(store, "rl:test:failopen", 1);
    let decision = limiter.check("anyone").await;
    assert!(decision.allowed);
}
