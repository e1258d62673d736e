//! Session and connection management.
//!
//! A session binds a live adapter, a signing key, and tenancy metadata. The
//! manager is the process-wide registry: it enforces the one-session-per-user
//! rule, provisions per-tenant isolation databases for SQL engines, and runs
//! the periodic sweep that health-checks adapters and evicts idle sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::AdapterSettings;
use crate::db::Adapter;
use crate::error::{GatewayError, GatewayResult};
use crate::models::DatabaseKind;

/// Interval of the combined health-check and eviction sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A server-side session handle.
pub struct Session {
    pub id: String,
    pub kind: DatabaseKind,
    pub adapter: Adapter,
    pub created_at: Instant,
    /// Epoch milliseconds of the last authenticated call.
    last_activity_ms: AtomicI64,
    /// 32 bytes of randomness, hex-encoded; returned once at connect.
    pub signing_key: String,
    pub user_id: Option<String>,
    pub is_isolated: bool,
    pub is_default_connection: bool,
    allow_destructive: AtomicBool,
    pub user_database: Option<String>,
}

impl Session {
    /// Update the activity timestamp.
    pub fn touch(&self) {
        self.last_activity_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Time since the last authenticated call.
    pub fn idle_for(&self) -> Duration {
        let idle_ms =
            chrono::Utc::now().timestamp_millis() - self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(idle_ms.max(0) as u64)
    }

    pub fn allow_destructive(&self) -> bool {
        self.allow_destructive.load(Ordering::Acquire)
    }

    fn set_allow_destructive(&self, value: bool) {
        self.allow_destructive.store(value, Ordering::Release);
    }
}

/// Result of a successful session creation.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: String,
    pub server_version: String,
    pub signing_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_database: Option<String>,
}

/// Process-wide session registry.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// userId -> sessionId. Swapped atomically so one user never holds two
    /// live sessions.
    user_slots: Mutex<HashMap<String, String>>,
    settings: AdapterSettings,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(settings: AdapterSettings, idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            user_slots: Mutex::new(HashMap::new()),
            settings,
            idle_timeout,
        }
    }

    /// Open a session: provision isolation if requested, connect the
    /// adapter, and bind the user slot.
    pub async fn create_session(
        &self,
        kind: DatabaseKind,
        connection_url: &str,
        user_id: Option<String>,
        is_isolated: bool,
        is_default_connection: bool,
    ) -> GatewayResult<CreatedSession> {
        if !kind.accepts_url(connection_url) {
            return Err(GatewayError::client_input(format!(
                "Connection URL does not match the {} scheme",
                kind.display_name()
            )));
        }

        // Close any previous session for this user before connecting.
        if let Some(user) = &user_id {
            let previous = self.user_slots.lock().await.remove(user);
            if let Some(previous_id) = previous {
                self.close_session(&previous_id).await;
            }
        }

        // Isolation only applies to SQL engines with a tenant token.
        let isolate = is_isolated && user_id.is_some() && kind != DatabaseKind::MongoDb;
        let mut user_database = None;
        let mut effective_url = connection_url.to_string();
        let mut effective_isolated = false;

        if let Some(user) = user_id.as_deref().filter(|_| isolate) {
            let database = tenant_database_name(user);
            match self.provision_isolation(kind, connection_url, &database).await {
                Ok(rewritten_url) => {
                    user_database = Some(database);
                    effective_url = rewritten_url;
                    effective_isolated = true;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        kind = %kind,
                        "Isolation provisioning failed; falling back to shared connection"
                    );
                }
            }
        }

        let adapter = Adapter::new(kind, self.settings, is_default_connection);
        if let Err(e) = adapter.connect(&effective_url).await {
            if !effective_isolated {
                return Err(e);
            }
            // Downgrade to the shared connection when the tenant database
            // is unreachable.
            warn!(error = %e, "Isolated connect failed; retrying the original URL");
            user_database = None;
            effective_isolated = false;
            adapter.connect(connection_url).await?;
        }
        let server_version = adapter.server_version().await?;

        let signing_key = hex::encode(rand::random::<[u8; 32]>());
        let session_id = Uuid::new_v4().to_string();

        let session = Arc::new(Session {
            id: session_id.clone(),
            kind,
            adapter,
            created_at: Instant::now(),
            last_activity_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            signing_key: signing_key.clone(),
            user_id: user_id.clone(),
            is_isolated: effective_isolated,
            is_default_connection,
            allow_destructive: AtomicBool::new(!is_default_connection),
            user_database: user_database.clone(),
        });

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session);

        // Bind the user slot last. A concurrent create for the same user may
        // have bound in between; the session it bound is "previous" from our
        // point of view and is closed now.
        if let Some(user) = &user_id {
            let raced = self
                .user_slots
                .lock()
                .await
                .insert(user.clone(), session_id.clone());
            if let Some(raced_id) = raced {
                if raced_id != session_id {
                    self.close_session(&raced_id).await;
                }
            }
        }

        info!(
            session_id = %session_id,
            kind = %kind,
            isolated = effective_isolated,
            default_connection = is_default_connection,
            "Session created"
        );

        Ok(CreatedSession {
            session_id,
            server_version,
            signing_key,
            user_database,
        })
    }

    /// Create the tenant database if missing and return the session URL
    /// rewritten to point at it.
    async fn provision_isolation(
        &self,
        kind: DatabaseKind,
        connection_url: &str,
        database: &str,
    ) -> GatewayResult<String> {
        let admin_url = admin_url(kind, connection_url)?;
        let admin = Adapter::new(kind, self.settings, false);
        admin.connect(&admin_url).await?;
        let ensure = admin.ensure_database(database).await;
        admin.disconnect().await;
        ensure?;

        let mut url = Url::parse(connection_url)
            .map_err(|e| GatewayError::client_input(format!("Invalid connection URL: {}", e)))?;
        url.set_path(&format!("/{}", database));
        Ok(url.to_string())
    }

    /// Look up a session, updating its activity timestamp.
    pub async fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        session.touch();
        Some(session)
    }

    /// Flip the destructive-override flag. Only meaningful on default
    /// connections.
    pub async fn set_session_allow_destructive(
        &self,
        session_id: &str,
        value: bool,
    ) -> GatewayResult<()> {
        let session = self
            .get_session(session_id)
            .await
            .ok_or_else(|| GatewayError::unauthorized("Unknown session"))?;
        if !session.is_default_connection {
            return Err(GatewayError::client_input(
                "Destructive override only applies to default connections",
            ));
        }
        session.set_allow_destructive(value);
        info!(session_id = %session_id, allow_destructive = value, "Destructive override updated");
        Ok(())
    }

    /// Close one session. Disconnect errors are logged; the registry entry
    /// is removed regardless.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let session = self.sessions.write().await.remove(session_id);
        let Some(session) = session else {
            return false;
        };
        if let Some(user) = &session.user_id {
            let mut slots = self.user_slots.lock().await;
            if slots.get(user) == Some(&session.id) {
                slots.remove(user);
            }
        }
        session.adapter.disconnect().await;
        info!(session_id = %session_id, "Session closed");
        true
    }

    /// Close every session (shutdown path).
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.close_session(&id).await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Start the periodic sweep: evict idle sessions, health-check the rest.
    pub fn start_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.sweep_once().await;
            }
        })
    }

    async fn sweep_once(&self) {
        let snapshot: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        for session in snapshot {
            if session.idle_for() > self.idle_timeout {
                info!(session_id = %session.id, "Evicting idle session");
                self.close_session(&session.id).await;
            } else if !session.adapter.ping().await {
                warn!(session_id = %session.id, "Adapter health check failed");
            }
        }
    }
}

/// Deterministic per-tenant database name: `u_` + first 32 hex chars of
/// SHA-256(userId).
pub fn tenant_database_name(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    format!("u_{}", &hex::encode(digest)[..32])
}

/// Administrative URL for provisioning and cleanup connections.
pub fn admin_url(kind: DatabaseKind, connection_url: &str) -> GatewayResult<String> {
    let mut url = Url::parse(connection_url)
        .map_err(|e| GatewayError::client_input(format!("Invalid connection URL: {}", e)))?;
    match kind {
        DatabaseKind::PostgreSql => url.set_path("/postgres"),
        DatabaseKind::MySql => url.set_path(""),
        DatabaseKind::MongoDb => {}
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_database_name_deterministic() {
        let first = tenant_database_name("alice");
        let second = tenant_database_name("alice");
        assert_eq!(first, second);
        assert!(first.starts_with("u_"));
        assert_eq!(first.len(), 2 + 32);
        assert_ne!(first, tenant_database_name("bob"));
    }

    #[test]
    fn test_tenant_database_name_is_hex() {
        let name = tenant_database_name("alice");
        assert!(name[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_admin_url_postgres() {
        let url = admin_url(
            DatabaseKind::PostgreSql,
            "postgres://user:pw@host:5432/app",
        )
        .unwrap();
        assert_eq!(url, "postgres://user:pw@host:5432/postgres");
    }

    #[test]
    fn test_admin_url_mysql_has_empty_path() {
        let url = admin_url(DatabaseKind::MySql, "mysql://user:pw@host:3306/app").unwrap();
        assert_eq!(url, "mysql://user:pw@host:3306");
    }

    #[test]
    fn test_admin_url_mongo_unchanged() {
        let original = "mongodb://host:27017/app";
        assert_eq!(
            admin_url(DatabaseKind::MongoDb, original).unwrap(),
            original
        );
    }

    #[tokio::test]
    async fn test_create_session_rejects_mismatched_scheme() {
        let manager = SessionManager::new(AdapterSettings::default(), Duration::from_secs(60));
        let result = manager
            .create_session(
                DatabaseKind::PostgreSql,
                "mysql://localhost/db",
                None,
                false,
                false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_get_session_unknown() {
        let manager = SessionManager::new(AdapterSettings::default(), Duration::from_secs(60));
        assert!(manager.get_session("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_close_session_unknown_is_false() {
        let manager = SessionManager::new(AdapterSettings::default(), Duration::from_secs(60));
        assert!(!manager.close_session("nope").await);
    }
}
