use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use super::callback::CallbackServer;
use super::persist::SessionStore;
use super::{pkce, AuthError, Identity, IdentityProvider, Session};

/// How long `sign_in` waits for the browser redirect
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub user: Option<Identity>,
    /// True while an auth operation is in flight
    pub loading: bool,
}

/// Observable sign-in state backed by an [`IdentityProvider`]
pub struct AuthSession {
    provider: Arc<dyn IdentityProvider>,
    store: SessionStore,
    session: Mutex<Option<Session>>,
    state: watch::Sender<AuthState>,
}

impl AuthSession {
    pub fn new(provider: Arc<dyn IdentityProvider>, store: SessionStore) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            provider,
            store,
            session: Mutex::new(None),
            state,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.state.borrow().user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current().map(|s| s.access_token)
    }

    /// Load a persisted session, refreshing it if the access token is about
    /// to expire. A session the provider no longer accepts is discarded.
    pub async fn restore(&self) -> Result<Option<Identity>, AuthError> {
        self.with_loading(async {
            let Some(session) = self.store.load()? else {
                log::debug!("auth: no stored session");
                return Ok(None);
            };

            if !session.expires_soon(now()) {
                return self.establish(session).map(Some);
            }

            log::debug!("auth: stored session expiring, refreshing");
            match self.provider.refresh(&session.refresh_token).await {
                Ok(fresh) => self.establish(fresh).map(Some),
                Err(AuthError::Rejected(message)) => {
                    log::warn!("Stored session no longer valid: {}", message);
                    self.store.clear()?;
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Refresh the access token if it is about to expire
    pub async fn ensure_fresh(&self) -> Result<(), AuthError> {
        let Some(session) = self.current() else {
            return Err(AuthError::NotSignedIn);
        };
        if !session.expires_soon(now()) {
            return Ok(());
        }

        match self.provider.refresh(&session.refresh_token).await {
            Ok(fresh) => self.establish(fresh).map(|_| ()),
            Err(AuthError::Rejected(message)) => {
                log::warn!("Session refresh rejected: {}", message);
                self.clear()?;
                Err(AuthError::NotSignedIn)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the provider who the access token belongs to. A rejected token
    /// signs the user out locally.
    pub async fn verify(&self) -> Result<Identity, AuthError> {
        let Some(session) = self.current() else {
            return Err(AuthError::NotSignedIn);
        };

        match self.provider.user(&session.access_token).await {
            Ok(user) => Ok(user),
            Err(AuthError::Rejected(message)) => {
                log::warn!("Access token rejected: {}", message);
                self.clear()?;
                Err(AuthError::NotSignedIn)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        self.with_loading(async {
            let session = self.provider.sign_in_with_password(email, password).await?;
            self.establish(session)
        })
        .await
    }

    /// OAuth sign-in with PKCE.
    ///
    /// Binds a loopback listener on `callback_port`, hands the provider's
    /// authorization URL to `on_url` (which should open it in a browser),
    /// then waits for the redirect and exchanges the code.
    pub async fn sign_in<F>(&self, provider: &str, callback_port: u16, on_url: F) -> Result<Identity, AuthError>
    where
        F: FnOnce(&str) + Send,
    {
        self.with_loading(async {
            let pair = pkce::generate();
            let state = uuid::Uuid::new_v4().simple().to_string();

            let server = CallbackServer::bind(callback_port).await?;
            let redirect_to = server.redirect_uri(&state);
            let url = self.provider.authorize_url(provider, &redirect_to, &pair.challenge);

            log::info!("Waiting for {} sign-in on port {}", provider, server.port());
            on_url(&url);

            let code = server.wait_for_code(state, CALLBACK_TIMEOUT).await?;
            let session = self.provider.exchange_code(&code, &pair.verifier).await?;
            self.establish(session)
        })
        .await
    }

    /// Forget the local session. Server-side revocation is best effort.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.with_loading(async {
            if let Some(session) = self.current() {
                if let Err(e) = self.provider.sign_out(&session.access_token).await {
                    log::warn!("Server-side sign-out failed: {}", e);
                }
            }
            self.clear()
        })
        .await
    }

    fn current(&self) -> Option<Session> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn establish(&self, session: Session) -> Result<Identity, AuthError> {
        self.store.save(&session)?;
        let user = session.user.clone();
        if let Ok(mut current) = self.session.lock() {
            *current = Some(session);
        }
        log::info!("Signed in as {}", user.label());
        self.state.send_modify(|s| s.user = Some(user.clone()));
        Ok(user)
    }

    fn clear(&self) -> Result<(), AuthError> {
        if let Ok(mut current) = self.session.lock() {
            *current = None;
        }
        self.state.send_modify(|s| s.user = None);
        self.store.clear()
    }

    async fn with_loading<T>(&self, op: impl Future<Output = T>) -> T {
        self.state.send_modify(|s| s.loading = true);
        let result = op.await;
        self.state.send_modify(|s| s.loading = false);
        result
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn session_for(email: &str, expires_at: i64) -> Session {
        Session {
            access_token: format!("access-{}", email),
            refresh_token: format!("refresh-{}", email),
            expires_at,
            user: Identity {
                id: format!("id-{}", email),
                email: Some(email.to_string()),
            },
        }
    }

    #[derive(Default)]
    struct FakeProvider {
        challenge: Mutex<Option<String>>,
        refreshes: AtomicUsize,
        sign_outs: AtomicUsize,
        reject_refresh: bool,
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
            if password == "hunter2" {
                Ok(session_for(email, now() + 3600))
            } else {
                Err(AuthError::Rejected("Invalid login credentials".to_string()))
            }
        }

        // Simulates a provider that immediately redirects back with a code
        fn authorize_url(&self, _provider: &str, redirect_to: &str, code_challenge: &str) -> String {
            *self.challenge.lock().unwrap() = Some(code_challenge.to_string());
            format!("{}&code=granted", redirect_to)
        }

        async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<Session, AuthError> {
            let challenge = self.challenge.lock().unwrap().clone();
            if auth_code == "granted" && challenge == Some(pkce::challenge_for(code_verifier)) {
                Ok(session_for("oauth@x.com", now() + 3600))
            } else {
                Err(AuthError::Rejected("bad code".to_string()))
            }
        }

        async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.reject_refresh {
                return Err(AuthError::Rejected("Invalid Refresh Token".to_string()));
            }
            let email = refresh_token.trim_start_matches("refresh-");
            Ok(session_for(email, now() + 3600))
        }

        async fn user(&self, access_token: &str) -> Result<Identity, AuthError> {
            match access_token.strip_prefix("access-") {
                Some(email) if !self.reject_refresh => Ok(session_for(email, 0).user),
                _ => Err(AuthError::Rejected("invalid JWT".to_string())),
            }
        }

        async fn sign_out(&self, _access_token: &str) -> Result<(), AuthError> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup(provider: FakeProvider) -> (TempDir, Arc<FakeProvider>, AuthSession) {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(provider);
        let auth = AuthSession::new(
            provider.clone(),
            SessionStore::new(dir.path()).without_keyring(),
        );
        (dir, provider, auth)
    }

    #[tokio::test]
    async fn test_password_sign_in_and_out() {
        let (dir, provider, auth) = setup(FakeProvider::default());
        let mut rx = auth.subscribe();
        assert_eq!(auth.state(), AuthState::default());

        let user = auth.sign_in_with_password("a@x.com", "hunter2").await.unwrap();
        assert_eq!(user.label(), "a@x.com");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().user.as_ref(), Some(&user));
        assert!(!auth.state().loading);
        assert_eq!(auth.access_token().as_deref(), Some("access-a@x.com"));

        let store = SessionStore::new(dir.path()).without_keyring();
        assert!(store.load().unwrap().is_some());

        auth.sign_out().await.unwrap();
        assert_eq!(auth.current_user(), None);
        assert_eq!(auth.access_token(), None);
        assert_eq!(provider.sign_outs.load(Ordering::SeqCst), 1);
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_password_leaves_signed_out() {
        let (_dir, _provider, auth) = setup(FakeProvider::default());

        let result = auth.sign_in_with_password("a@x.com", "wrong").await;
        assert!(matches!(result, Err(AuthError::Rejected(_))));
        assert_eq!(auth.state(), AuthState::default());
    }

    #[tokio::test]
    async fn test_restore_fresh_session_without_refresh() {
        let (dir, provider, auth) = setup(FakeProvider::default());
        SessionStore::new(dir.path())
            .without_keyring()
            .save(&session_for("a@x.com", now() + 3600))
            .unwrap();

        let user = auth.restore().await.unwrap().unwrap();
        assert_eq!(user.label(), "a@x.com");
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
        assert!(!auth.state().loading);
    }

    #[tokio::test]
    async fn test_restore_refreshes_expired_session() {
        let (dir, provider, auth) = setup(FakeProvider::default());
        SessionStore::new(dir.path())
            .without_keyring()
            .save(&session_for("a@x.com", now() - 10))
            .unwrap();

        let user = auth.restore().await.unwrap().unwrap();
        assert_eq!(user.label(), "a@x.com");
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);

        let stored = SessionStore::new(dir.path()).without_keyring().load().unwrap().unwrap();
        assert!(stored.expires_at > now());
    }

    #[tokio::test]
    async fn test_restore_discards_rejected_session() {
        let (dir, _provider, auth) = setup(FakeProvider {
            reject_refresh: true,
            ..FakeProvider::default()
        });
        let store = SessionStore::new(dir.path()).without_keyring();
        store.save(&session_for("a@x.com", now() - 10)).unwrap();

        assert_eq!(auth.restore().await.unwrap(), None);
        assert_eq!(auth.current_user(), None);
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_without_stored_session() {
        let (_dir, _provider, auth) = setup(FakeProvider::default());
        assert_eq!(auth.restore().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ensure_fresh_requires_sign_in() {
        let (_dir, _provider, auth) = setup(FakeProvider::default());
        assert!(matches!(auth.ensure_fresh().await, Err(AuthError::NotSignedIn)));

        auth.sign_in_with_password("a@x.com", "hunter2").await.unwrap();
        auth.ensure_fresh().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify() {
        let (_dir, _provider, auth) = setup(FakeProvider::default());
        assert!(matches!(auth.verify().await, Err(AuthError::NotSignedIn)));

        auth.sign_in_with_password("a@x.com", "hunter2").await.unwrap();
        assert_eq!(auth.verify().await.unwrap().label(), "a@x.com");
    }

    #[tokio::test]
    async fn test_verify_rejected_token_signs_out() {
        let (_dir, _provider, auth) = setup(FakeProvider {
            reject_refresh: true,
            ..FakeProvider::default()
        });
        auth.sign_in_with_password("a@x.com", "hunter2").await.unwrap();

        assert!(matches!(auth.verify().await, Err(AuthError::NotSignedIn)));
        assert_eq!(auth.current_user(), None);
    }

    #[tokio::test]
    async fn test_oauth_sign_in() {
        let (_dir, _provider, auth) = setup(FakeProvider::default());

        let user = auth
            .sign_in("google", 0, |url| {
                let url = url.to_string();
                tokio::spawn(async move {
                    let _ = reqwest::get(url).await;
                });
            })
            .await
            .unwrap();

        assert_eq!(user.label(), "oauth@x.com");
        assert_eq!(auth.current_user(), Some(user));
        assert!(!auth.state().loading);
    }
}
