//! Daily cleanup scheduler.
//!
//! Fires at 02:00 UTC and drops all user databases on every configured
//! default engine. The same routine backs the token-gated admin endpoint.
//! Multiple replicas may fire concurrently; the drops are `IF EXISTS` and
//! per-database failures never abort the loop, so the routine is idempotent.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::AdapterSettings;
use crate::db::Adapter;
use crate::models::{DatabaseKind, DefaultDatabaseConfig};
use crate::session::admin_url;

/// 02:00:00 UTC, every day (sec min hour day month weekday).
const CLEANUP_SCHEDULE: &str = "0 0 2 * * *";

/// Outcome of one engine's cleanup pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOutcome {
    pub kind: DatabaseKind,
    pub dropped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run the cleanup routine across all configured default engines.
///
/// Each engine gets a short-lived adapter on its administrative URL. Errors
/// are captured per engine; the loop always visits every configuration.
pub async fn run_cleanup(
    defaults: &[DefaultDatabaseConfig],
    settings: AdapterSettings,
) -> Vec<CleanupOutcome> {
    let mut outcomes = Vec::new();
    for config in defaults {
        let outcome = cleanup_engine(config, settings).await;
        match &outcome.error {
            Some(e) => warn!(kind = %config.kind, error = %e, "Cleanup pass failed"),
            None => info!(
                kind = %config.kind,
                dropped = outcome.dropped.len(),
                "Cleanup pass complete"
            ),
        }
        outcomes.push(outcome);
    }
    outcomes
}

async fn cleanup_engine(
    config: &DefaultDatabaseConfig,
    settings: AdapterSettings,
) -> CleanupOutcome {
    let url = match admin_url(config.kind, &config.url) {
        Ok(url) => url,
        Err(e) => {
            return CleanupOutcome {
                kind: config.kind,
                dropped: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    };

    let adapter = Adapter::new(config.kind, settings, false);
    if let Err(e) = adapter.connect(&url).await {
        return CleanupOutcome {
            kind: config.kind,
            dropped: Vec::new(),
            error: Some(e.to_string()),
        };
    }

    let result = adapter.drop_all_user_databases().await;
    adapter.disconnect().await;

    match result {
        Ok(dropped) => CleanupOutcome {
            kind: config.kind,
            dropped,
            error: None,
        },
        Err(e) => CleanupOutcome {
            kind: config.kind,
            dropped: Vec::new(),
            error: Some(e.to_string()),
        },
    }
}

/// Start the daily scheduler task.
pub fn start_scheduler(
    defaults: Arc<Vec<DefaultDatabaseConfig>>,
    settings: AdapterSettings,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let schedule = match Schedule::from_str(CLEANUP_SCHEDULE) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!(error = %e, "Invalid cleanup schedule");
                return;
            }
        };
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                error!("Cleanup schedule has no upcoming firing");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            info!(next = %next, "Next tenant cleanup scheduled");
            tokio::time::sleep(wait).await;

            info!("Running scheduled tenant cleanup");
            run_cleanup(&defaults, settings).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_parses_and_fires_at_two_utc() {
        let schedule = Schedule::from_str(CLEANUP_SCHEDULE).unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "02:00:00");
    }

    #[tokio::test]
    async fn test_cleanup_with_no_defaults_is_empty() {
        let outcomes = run_cleanup(&[], AdapterSettings::default()).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_reports_unreachable_engine() {
        let defaults = vec![DefaultDatabaseConfig {
            kind: DatabaseKind::PostgreSql,
            url: "postgres://nobody@127.0.0.1:1/none".into(),
            display_name: "PostgreSQL".into(),
        }];
        let outcomes = run_cleanup(&defaults, AdapterSettings::default()).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].error.is_some());
        assert!(outcomes[0].dropped.is_empty());
    }
}
