//! Authentication session manager
//!
//! Single owner of the auth session: bearer token, absolute expiry,
//! authenticated flag. Subscribers are notified through a watch channel
//! on every change; a 60 s sweep task remains as a backstop so a session
//! that expires with no API activity still flips to logged-out.
//!
//! Sessions persist to ~/.opsdeck/auth.json so a console restart within
//! the validity window stays logged in. An expired record on disk is
//! treated as absent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{config_dir, StorageError};
use crate::error::Result;
use crate::events::{ConsoleEvent, EventBus};

/// Default session validity: 5 hours
pub const SESSION_VALIDITY: Duration = Duration::from_secs(5 * 60 * 60);

/// Expiry sweep interval
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Persisted auth session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

fn auth_file() -> std::result::Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("auth.json"))
}

/// Owns the auth session and notifies subscribers on change.
pub struct AuthManager {
    session: RwLock<Option<AuthSession>>,
    /// Latest authenticated flag, observed by subscribers
    state_tx: watch::Sender<bool>,
    events: EventBus,
    path: PathBuf,
}

impl AuthManager {
    pub fn new(events: EventBus) -> std::result::Result<Self, StorageError> {
        Ok(Self::with_path(events, auth_file()?))
    }

    /// Custom storage path (for testing)
    pub fn with_path(events: EventBus, path: PathBuf) -> Self {
        let (state_tx, _) = watch::channel(false);
        Self {
            session: RwLock::new(None),
            state_tx,
            events,
            path,
        }
    }

    /// Subscribe to authenticated-flag changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|s| !s.is_expired())
            .unwrap_or(false)
    }

    /// Current bearer token, if a live session exists.
    pub fn token(&self) -> Option<String> {
        let guard = self.session.read();
        match guard.as_ref() {
            Some(s) if !s.is_expired() => Some(s.token.clone()),
            _ => None,
        }
    }

    /// Restore a persisted session from disk. Expired or malformed
    /// records are discarded.
    pub async fn restore(&self) -> Result<bool> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<AuthSession>(&contents) {
            Ok(session) if !session.is_expired() => {
                info!("Restored auth session, expires at {}", session.expires_at);
                *self.session.write() = Some(session);
                self.publish(true);
                Ok(true)
            }
            Ok(_) => {
                debug!("Persisted auth session expired, discarding");
                let _ = fs::remove_file(&self.path).await;
                Ok(false)
            }
            Err(e) => {
                warn!("Auth file corrupted: {}", e);
                let _ = fs::remove_file(&self.path).await;
                Ok(false)
            }
        }
    }

    /// Install a fresh session after a successful login.
    pub async fn login(&self, token: String) -> Result<()> {
        let session = AuthSession {
            token,
            expires_at: Utc::now() + chrono::Duration::from_std(SESSION_VALIDITY).unwrap_or(chrono::Duration::hours(5)),
        };
        self.persist(&session).await?;
        *self.session.write() = Some(session);
        self.publish(true);
        info!("Auth session established");
        Ok(())
    }

    /// Explicit logout: wipe memory and disk, notify subscribers.
    pub async fn logout(&self) {
        self.clear().await;
        info!("Auth session cleared (logout)");
    }

    /// Called by the API layer when the backend answers 401: wipe
    /// credentials and tell the shell to return to the login page.
    pub async fn handle_unauthorized(&self) {
        self.clear().await;
        self.events.emit(ConsoleEvent::ReLoginRequired);
        warn!("Backend rejected credentials, session wiped");
    }

    async fn clear(&self) {
        *self.session.write() = None;
        let _ = fs::remove_file(&self.path).await;
        self.publish(false);
    }

    async fn persist(&self, session: &AuthSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, json).await?;
        Ok(())
    }

    fn publish(&self, authenticated: bool) {
        // send_replace so the flag is current even with no subscriber
        let previous = self.state_tx.send_replace(authenticated);
        if previous != authenticated {
            self.events.emit(ConsoleEvent::AuthChanged { authenticated });
        }
    }

    /// Spawn the expiry sweep. Runs until the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let expired = manager
                    .session
                    .read()
                    .as_ref()
                    .map(|s| s.is_expired())
                    .unwrap_or(false);
                if expired {
                    info!("Auth session expired, sweeping");
                    manager.clear().await;
                    manager.events.emit(ConsoleEvent::ReLoginRequired);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &tempfile::TempDir) -> AuthManager {
        AuthManager::with_path(EventBus::new(), dir.path().join("auth.json"))
    }

    #[tokio::test]
    async fn test_login_then_token_available() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);

        assert!(!manager.is_authenticated());
        manager.login("tok-abc".to_string()).await.unwrap();
        assert!(manager.is_authenticated());
        assert_eq!(manager.token().as_deref(), Some("tok-abc"));
    }

    #[tokio::test]
    async fn test_logout_wipes_disk_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);

        manager.login("tok-abc".to_string()).await.unwrap();
        assert!(dir.path().join("auth.json").exists());

        manager.logout().await;
        assert!(!manager.is_authenticated());
        assert!(manager.token().is_none());
        assert!(!dir.path().join("auth.json").exists());
    }

    #[tokio::test]
    async fn test_restore_valid_session() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = manager_in(&dir);
            manager.login("tok-persist".to_string()).await.unwrap();
        }

        let manager = manager_in(&dir);
        assert!(manager.restore().await.unwrap());
        assert_eq!(manager.token().as_deref(), Some("tok-persist"));
    }

    #[tokio::test]
    async fn test_restore_expired_session_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let stale = AuthSession {
            token: "tok-old".to_string(),
            expires_at: Utc::now() - chrono::Duration::hours(1),
        };
        tokio::fs::write(&path, serde_json::to_string(&stale).unwrap())
            .await
            .unwrap();

        let manager = AuthManager::with_path(EventBus::new(), path.clone());
        assert!(!manager.restore().await.unwrap());
        assert!(!manager.is_authenticated());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unauthorized_emits_relogin() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let manager = AuthManager::with_path(bus, dir.path().join("auth.json"));

        manager.login("tok".to_string()).await.unwrap();
        // drain login events
        while let Ok(event) = rx.try_recv() {
            drop(event);
        }

        manager.handle_unauthorized().await;
        let mut saw_relogin = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ConsoleEvent::ReLoginRequired) {
                saw_relogin = true;
            }
        }
        assert!(saw_relogin);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_watch_subscriber_sees_flag_change() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        let mut rx = manager.subscribe();

        assert!(!*rx.borrow());
        manager.login("tok".to_string()).await.unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
