//! Integration tests for the session manager.
//!
//! These tests require a running PostgreSQL server. Set TEST_POSTGRES_URL to
//! run them.

use std::time::Duration;

use query_gateway::config::AdapterSettings;
use query_gateway::models::DatabaseKind;
use query_gateway::session::{tenant_database_name, SessionManager};

fn postgres_url() -> Option<String> {
    match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            None
        }
    }
}

fn manager() -> SessionManager {
    SessionManager::new(AdapterSettings::default(), Duration::from_secs(1800))
}

#[tokio::test]
async fn test_create_and_close_session() {
    let Some(url) = postgres_url() else { return };
    let manager = manager();

    let created = manager
        .create_session(DatabaseKind::PostgreSql, &url, None, false, false)
        .await
        .unwrap();
    assert!(!created.session_id.is_empty());
    assert_eq!(created.signing_key.len(), 64);
    assert!(created.server_version.contains("PostgreSQL"));
    assert!(created.user_database.is_none());
    assert_eq!(manager.session_count().await, 1);

    let session = manager.get_session(&created.session_id).await.unwrap();
    assert!(session.adapter.is_connected().await);

    assert!(manager.close_session(&created.session_id).await);
    assert_eq!(manager.session_count().await, 0);
    assert!(manager.get_session(&created.session_id).await.is_none());
}

#[tokio::test]
async fn test_one_session_per_user() {
    let Some(url) = postgres_url() else { return };
    let manager = manager();

    let first = manager
        .create_session(
            DatabaseKind::PostgreSql,
            &url,
            Some("tenant-42".into()),
            false,
            false,
        )
        .await
        .unwrap();
    let second = manager
        .create_session(
            DatabaseKind::PostgreSql,
            &url,
            Some("tenant-42".into()),
            false,
            false,
        )
        .await
        .unwrap();

    // The first session was closed when the second was created.
    assert!(manager.get_session(&first.session_id).await.is_none());
    assert!(manager.get_session(&second.session_id).await.is_some());
    assert_eq!(manager.session_count().await, 1);

    manager.close_session(&second.session_id).await;
}

#[tokio::test]
async fn test_isolated_session_provisions_tenant_database() {
    let Some(url) = postgres_url() else { return };
    let manager = manager();
    let user = "isolation-probe";
    let expected_db = tenant_database_name(user);

    let created = manager
        .create_session(
            DatabaseKind::PostgreSql,
            &url,
            Some(user.into()),
            true,
            true,
        )
        .await
        .unwrap();
    assert_eq!(created.user_database.as_deref(), Some(expected_db.as_str()));

    let session = manager.get_session(&created.session_id).await.unwrap();
    assert!(session.is_isolated);
    assert_eq!(session.user_database.as_deref(), Some(expected_db.as_str()));

    // Provisioning is idempotent: a second isolated session reuses the
    // same tenant database.
    let again = manager
        .create_session(
            DatabaseKind::PostgreSql,
            &url,
            Some(user.into()),
            true,
            true,
        )
        .await
        .unwrap();
    assert_eq!(again.user_database.as_deref(), Some(expected_db.as_str()));

    manager.close_session(&again.session_id).await;
}

#[tokio::test]
async fn test_allow_destructive_toggle_rules() {
    let Some(url) = postgres_url() else { return };
    let manager = manager();

    // Non-default session: toggle is rejected.
    let private = manager
        .create_session(DatabaseKind::PostgreSql, &url, None, false, false)
        .await
        .unwrap();
    assert!(manager
        .set_session_allow_destructive(&private.session_id, true)
        .await
        .is_err());

    // Default session: starts locked down, can be extended.
    let shared = manager
        .create_session(DatabaseKind::PostgreSql, &url, None, false, true)
        .await
        .unwrap();
    let session = manager.get_session(&shared.session_id).await.unwrap();
    assert!(!session.allow_destructive());
    manager
        .set_session_allow_destructive(&shared.session_id, true)
        .await
        .unwrap();
    assert!(session.allow_destructive());

    manager.close_session(&private.session_id).await;
    manager.close_session(&shared.session_id).await;
}

#[tokio::test]
async fn test_mongo_sessions_never_isolate() {
    let Some(url) = std::env::var("TEST_MONGODB_URL").ok() else {
        eprintln!("Skipping test: TEST_MONGODB_URL not set");
        return;
    };
    let manager = manager();
    let created = manager
        .create_session(
            DatabaseKind::MongoDb,
            &url,
            Some("tenant-mongo".into()),
            true,
            false,
        )
        .await
        .unwrap();
    assert!(created.user_database.is_none());
    let session = manager.get_session(&created.session_id).await.unwrap();
    assert!(!session.is_isolated);
    manager.close_session(&created.session_id).await;
}
