//! Query Gateway - main entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use query_gateway::config::{AdapterSettings, Config};
use query_gateway::http::{self, AppState};
use query_gateway::rate_limit::RateLimiter;
use query_gateway::redis_client::RedisStore;
use query_gateway::scheduler::start_scheduler;
use query_gateway::session::SessionManager;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    if let Err(message) = config.validate_secrets() {
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }

    info!(
        addr = %config.bind_addr(),
        "Starting Query Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let defaults = Arc::new(config.default_databases());
    for default in defaults.iter() {
        info!(
            kind = %default.kind,
            name = %default.display_name,
            url = %default.masked_url(),
            "Default connection configured"
        );
    }

    let redis = Arc::new(RedisStore::new(
        &config.redis_url,
        config.redis_retry_attempts,
        Duration::from_millis(config.redis_retry_delay_ms),
    )?);
    if let Err(e) = redis.ping().await {
        warn!(error = %e, "Redis is unreachable; rate limiting will fail open");
    }

    let settings = AdapterSettings::from_config(&config);
    let sessions = Arc::new(SessionManager::new(settings, config.session_timeout()));
    let sweep_handle = sessions.clone().start_sweep();
    let scheduler_handle = start_scheduler(defaults.clone(), settings);

    let state = Arc::new(AppState {
        query_limiter: RateLimiter::new(redis.clone(), "rl:query", config.rate_limit_query_max),
        connection_limiter: RateLimiter::new(
            redis.clone(),
            "rl:connect",
            config.rate_limit_connection_max,
        ),
        config,
        sessions,
        defaults,
    });

    let result = http::serve(state).await;

    sweep_handle.abort();
    scheduler_handle.abort();

    if let Err(e) = result {
        tracing::error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
