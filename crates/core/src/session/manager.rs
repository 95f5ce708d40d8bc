//! Hands out a valid session, logging in again when the stored one is unusable.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::pacing::Pacer;

use super::{Credentials, Session, SessionError, SessionStore};

/// Storefront-side authentication, implemented by the automation driver.
#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    /// Restore `session` in the driver and check the storefront accepts it.
    async fn verify(&self, session: &Session) -> Result<bool, SessionError>;

    /// Log in from scratch and capture the resulting session.
    async fn login(&self, credentials: &Credentials) -> Result<Session, SessionError>;
}

/// Answers "give me a valid session" and "invalidate the current session".
pub struct SessionManager {
    store: SessionStore,
    authenticator: Arc<dyn SessionAuthenticator>,
    credentials: Credentials,
    login_attempts: u32,
    clock: Arc<dyn Clock>,
    pacer: Pacer,
}

impl SessionManager {
    pub fn new(
        store: SessionStore,
        authenticator: Arc<dyn SessionAuthenticator>,
        credentials: Credentials,
        login_attempts: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            authenticator,
            credentials,
            login_attempts: login_attempts.max(1),
            clock,
            pacer: Pacer::disabled(),
        }
    }

    /// Pace consecutive login attempts.
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Return a session the storefront accepts.
    ///
    /// Reuses the stored session when it is unexpired and still verifies,
    /// otherwise logs in (up to the configured number of attempts) and
    /// stores the new session.
    pub async fn acquire(&self) -> Result<Session, SessionError> {
        let now = self.clock.now();

        match self.store.load() {
            Some(session) if session.is_valid_at(now) => {
                match self.authenticator.verify(&session).await {
                    Ok(true) => {
                        info!("Cached session is valid");
                        return Ok(session);
                    }
                    Ok(false) => warn!("Cached session was rejected by the storefront"),
                    Err(e) => warn!("Could not verify cached session: {}", e),
                }
            }
            Some(_) => info!("Cached session expired"),
            None => info!("No cached session found"),
        }

        let mut last_error = String::from("no login attempted");
        for attempt in 1..=self.login_attempts {
            info!("Logging in (attempt {}/{})", attempt, self.login_attempts);
            match self.authenticator.login(&self.credentials).await {
                Ok(session) => {
                    self.store.save(&session)?;
                    info!("Login successful, session stored");
                    return Ok(session);
                }
                Err(e) => {
                    warn!("Login attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                    if attempt < self.login_attempts {
                        self.pacer.long("before next login attempt").await;
                    }
                }
            }
        }

        Err(SessionError::Exhausted {
            attempts: self.login_attempts,
            last_error,
        })
    }

    /// Drop the stored session so the next `acquire` logs in again.
    pub fn invalidate(&self) -> Result<(), SessionError> {
        info!("Invalidating stored session");
        self.store.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, FixedClock};
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Authenticator with scripted answers.
    struct ScriptedAuth {
        verify_ok: bool,
        failing_logins: u32,
        logins: AtomicU32,
        session: Session,
    }

    #[async_trait]
    impl SessionAuthenticator for ScriptedAuth {
        async fn verify(&self, _session: &Session) -> Result<bool, SessionError> {
            Ok(self.verify_ok)
        }

        async fn login(&self, _credentials: &Credentials) -> Result<Session, SessionError> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst);
            if n < self.failing_logins {
                Err(SessionError::AuthenticationFailed("bad gateway".to_string()))
            } else {
                Ok(self.session.clone())
            }
        }
    }

    fn setup(verify_ok: bool, failing_logins: u32) -> (SessionManager, Arc<ScriptedAuth>, TempDir) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(fixtures::now()));
        let auth = Arc::new(ScriptedAuth {
            verify_ok,
            failing_logins,
            logins: AtomicU32::new(0),
            session: fixtures::session(fixtures::now()),
        });
        let manager = SessionManager::new(
            SessionStore::new(dir.path().join("session.json")),
            Arc::clone(&auth) as Arc<dyn SessionAuthenticator>,
            fixtures::credentials(),
            3,
            clock,
        );
        (manager, auth, dir)
    }

    #[tokio::test]
    async fn test_logs_in_and_stores_when_no_session() {
        let (manager, auth, dir) = setup(true, 0);

        let session = manager.acquire().await.unwrap();

        assert_eq!(auth.logins.load(Ordering::SeqCst), 1);
        let stored = SessionStore::new(dir.path().join("session.json")).load();
        assert_eq!(stored, Some(session));
    }

    #[tokio::test]
    async fn test_reuses_valid_cached_session() {
        let (manager, auth, _dir) = setup(true, 0);
        manager.acquire().await.unwrap();

        manager.acquire().await.unwrap();

        assert_eq!(auth.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_session_triggers_login() {
        let (manager, auth, _dir) = setup(false, 0);
        manager.acquire().await.unwrap();

        manager.acquire().await.unwrap();

        assert_eq!(auth.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_session_triggers_login_without_verify() {
        let (manager, auth, dir) = setup(true, 0);
        let mut old = fixtures::session(fixtures::now() - Duration::days(10));
        old.expires_at = fixtures::now() - Duration::hours(1);
        SessionStore::new(dir.path().join("session.json"))
            .save(&old)
            .unwrap();

        manager.acquire().await.unwrap();

        assert_eq!(auth.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_login_then_succeeds() {
        let (manager, auth, _dir) = setup(true, 2);

        manager.acquire().await.unwrap();

        assert_eq!(auth.logins.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_login_attempts() {
        let (manager, auth, _dir) = setup(true, 10);

        let err = manager.acquire().await.unwrap_err();

        assert!(matches!(err, SessionError::Exhausted { attempts: 3, .. }));
        assert_eq!(auth.logins.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalidate_forces_login() {
        let (manager, auth, _dir) = setup(true, 0);
        manager.acquire().await.unwrap();

        manager.invalidate().unwrap();
        manager.acquire().await.unwrap();

        assert_eq!(auth.logins.load(Ordering::SeqCst), 2);
    }
}
