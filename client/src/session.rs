//! Session lifecycle.
//!
//! Owns the bearer token and its expiry checking. The token's expiry
//! claim is decoded locally without verifying the signature — signature
//! verification is the server's job; the local decode only exists to
//! avoid a network round trip for tokens that are obviously dead. A
//! token that passes the local check is still confirmed against the
//! server once, which covers revocation and secret rotation.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{AuthError, SyncError};
use crate::remote::{RemoteClient, TokenHandle, User};
use crate::store::{LocalStore, keys};

/// Local expiry re-check interval while authenticated.
pub const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Uninitialized,
    Unauthenticated,
    Authenticated,
}

#[derive(Deserialize)]
struct Claims {
    exp: i64,
}

/// Decode the expiry claim from a JWT-shaped bearer token. Returns
/// `None` for anything that doesn't carry a decodable `exp`.
#[must_use]
pub fn decode_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Some(claims.exp)
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

struct SessionInner {
    store: Arc<dyn LocalStore>,
    remote: Arc<RemoteClient>,
    token: TokenHandle,
    state: watch::Sender<AuthState>,
}

/// Manages the authentication token and publishes state transitions.
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn LocalStore>, remote: Arc<RemoteClient>) -> Self {
        let (state, _) = watch::channel(AuthState::Uninitialized);
        let token = remote.token_handle();
        Self {
            inner: Arc::new(SessionInner {
                store,
                remote,
                token,
                state,
            }),
        }
    }

    #[must_use]
    pub fn current(&self) -> AuthState {
        *self.inner.state.borrow()
    }

    /// Subscribe to state transitions. The UI layer reacts to these; so
    /// does the tracker's persistence-target switch.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    fn publish(&self, state: AuthState) {
        // send_replace never fails even with no subscribers.
        self.inner.state.send_replace(state);
    }

    fn set_token(&self, token: Option<String>) {
        *self
            .inner
            .token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = token;
    }

    fn current_token(&self) -> Option<String> {
        self.inner
            .token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn purge(&self) -> Result<(), SyncError> {
        self.inner.store.remove(keys::AUTH_TOKEN)?;
        self.inner.store.remove(keys::AUTH_USER)?;
        self.set_token(None);
        Ok(())
    }

    /// Restore the session from the persisted token, if any.
    ///
    /// A locally expired (or undecodable) token is purged without any
    /// network traffic. A locally valid one flips the state to
    /// `Authenticated` optimistically, then makes a single confirmation
    /// call; only an auth rejection reverses the optimism — a transient
    /// failure leaves the session standing, to be caught by the next
    /// authenticated request.
    pub async fn initialize(&self) -> Result<AuthState, SyncError> {
        let Some(token) = self.inner.store.get(keys::AUTH_TOKEN)? else {
            self.publish(AuthState::Unauthenticated);
            return Ok(AuthState::Unauthenticated);
        };

        let locally_valid = decode_expiry(&token).is_some_and(|exp| exp > now_unix());
        if !locally_valid {
            tracing::info!("persisted token expired, starting unauthenticated");
            self.purge()?;
            self.publish(AuthState::Unauthenticated);
            return Ok(AuthState::Unauthenticated);
        }

        self.set_token(Some(token));
        self.publish(AuthState::Authenticated);

        match self.inner.remote.verify_session().await {
            Ok(user) => {
                self.inner
                    .store
                    .set(keys::AUTH_USER, &serde_json::to_string(&user)?)?;
                Ok(AuthState::Authenticated)
            }
            Err(SyncError::AuthRejected(reason)) => {
                tracing::info!(%reason, "server rejected persisted session");
                self.logout()?;
                Ok(AuthState::Unauthenticated)
            }
            Err(err) => {
                tracing::warn!(error = %err, "session confirmation failed, staying optimistic");
                Ok(AuthState::Authenticated)
            }
        }
    }

    fn establish(
        &self,
        result: Result<crate::remote::AuthSession, AuthError>,
    ) -> Result<User, AuthError> {
        let session = result?;
        let persist = || -> Result<(), SyncError> {
            self.inner.store.set(keys::AUTH_TOKEN, &session.token)?;
            self.inner
                .store
                .set(keys::AUTH_USER, &serde_json::to_string(&session.user)?)?;
            Ok(())
        };
        if let Err(err) = persist() {
            // The session is live even if the device store is unwritable.
            tracing::warn!(error = %err, "failed to persist session token");
        }
        self.set_token(Some(session.token));
        self.publish(AuthState::Authenticated);
        Ok(session.user)
    }

    /// Log in. Credentials are pre-checked locally with the same bounds
    /// the server enforces, so most rejections never leave the device.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let report = nosh_core::validate::validate_credentials(username, password);
        if !report.is_valid() {
            return Err(AuthError::Validation(report.errors));
        }
        let result = self.inner.remote.login(username.trim(), password).await;
        self.establish(result)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let report = nosh_core::validate::validate_credentials(username, password);
        if !report.is_valid() {
            return Err(AuthError::Validation(report.errors));
        }
        let result = self.inner.remote.register(username.trim(), password).await;
        self.establish(result)
    }

    /// Drop the session: purge the persisted token and identity, clear
    /// the remote client's credential, publish the transition. In-memory
    /// tracker state is not migrated back to the local cache.
    pub fn logout(&self) -> Result<(), SyncError> {
        self.purge()?;
        self.publish(AuthState::Unauthenticated);
        Ok(())
    }

    /// Re-check local token expiry on a fixed interval while
    /// authenticated; expiry takes the normal logout path. Abort the
    /// returned handle to stop the watch.
    #[must_use]
    pub fn spawn_expiry_watch(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(EXPIRY_CHECK_INTERVAL).await;
                if manager.current() != AuthState::Authenticated {
                    continue;
                }
                let expired = manager
                    .current_token()
                    .and_then(|t| decode_expiry(&t))
                    .is_none_or(|exp| exp <= now_unix());
                if expired {
                    tracing::info!("session token expired");
                    if let Err(err) = manager.logout() {
                        tracing::warn!(error = %err, "failed to purge expired session");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    pub(crate) fn make_token(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"1","exp":{exp}}}"#));
        format!("{header}.{payload}.unverified-signature")
    }

    fn manager_with(store: Arc<MemoryStore>) -> SessionManager {
        // Port 9 (discard) — initialize must not reach the network in
        // the paths these tests cover.
        let remote = Arc::new(RemoteClient::new("http://127.0.0.1:9").unwrap());
        SessionManager::new(store, remote)
    }

    #[test]
    fn test_decode_expiry() {
        assert_eq!(decode_expiry(&make_token(1_700_000_000)), Some(1_700_000_000));
    }

    #[test]
    fn test_decode_expiry_garbage() {
        assert!(decode_expiry("not-a-jwt").is_none());
        assert!(decode_expiry("a.b.c").is_none());
        assert!(decode_expiry("").is_none());
    }

    #[tokio::test]
    async fn test_initialize_without_token() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(Arc::clone(&store));
        assert_eq!(manager.current(), AuthState::Uninitialized);

        let state = manager.initialize().await.unwrap();
        assert_eq!(state, AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_initialize_expired_token_purges_locally() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::AUTH_TOKEN, &make_token(now_unix() - 60)).unwrap();
        store.set(keys::AUTH_USER, r#"{"id":1,"username":"alice"}"#).unwrap();

        let manager = manager_with(Arc::clone(&store));
        let state = manager.initialize().await.unwrap();

        assert_eq!(state, AuthState::Unauthenticated);
        assert!(store.get(keys::AUTH_TOKEN).unwrap().is_none());
        assert!(store.get(keys::AUTH_USER).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_undecodable_token_purges() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::AUTH_TOKEN, "garbage").unwrap();

        let manager = manager_with(Arc::clone(&store));
        let state = manager.initialize().await.unwrap();

        assert_eq!(state, AuthState::Unauthenticated);
        assert!(store.get(keys::AUTH_TOKEN).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_validation_precheck_skips_network() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(store);

        let err = manager.login("ab", "123").await.unwrap_err();
        match err {
            AuthError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(manager.current(), AuthState::Uninitialized);
    }

    #[tokio::test]
    async fn test_logout_clears_state() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::AUTH_TOKEN, &make_token(now_unix() + 3600)).unwrap();
        let manager = manager_with(Arc::clone(&store));
        manager.set_token(Some("tok".to_string()));
        manager.publish(AuthState::Authenticated);

        manager.logout().unwrap();

        assert_eq!(manager.current(), AuthState::Unauthenticated);
        assert!(store.get(keys::AUTH_TOKEN).unwrap().is_none());
        assert!(manager.current_token().is_none());
    }
}
