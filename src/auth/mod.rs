//! Who is signed in.
//!
//! [`AuthSession`] wraps an [`IdentityProvider`] (GoTrue in production) and
//! publishes the signed-in user as an observable [`AuthState`].

mod callback;
mod gotrue;
mod persist;
pub mod pkce;
mod session;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use callback::CallbackServer;
pub use gotrue::GoTrueClient;
pub use persist::SessionStore;
pub use session::{AuthSession, AuthState};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sign-in rejected: {0}")]
    Rejected(String),
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("OAuth callback failed: {0}")]
    Callback(String),
    #[error("Timed out waiting for the sign-in redirect")]
    CallbackTimeout,
    #[error("Not signed in")]
    NotSignedIn,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Keyring error: {0}")]
    Keyring(String),
}

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    /// Name recorded as `added_by` on new items
    pub fn label(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

/// Tokens issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) when `access_token` expires
    pub expires_at: i64,
    pub user: Identity,
}

/// Refresh this long before the access token actually expires
const EXPIRY_LEEWAY_SECS: i64 = 60;

impl Session {
    pub fn expires_soon(&self, now: i64) -> bool {
        self.expires_at - EXPIRY_LEEWAY_SECS <= now
    }
}

/// Token endpoints of an identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// URL that starts the provider's OAuth flow and redirects back to
    /// `redirect_to` with a `code`
    fn authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> String;

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<Session, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError>;

    /// The user the access token belongs to
    async fn user(&self, access_token: &str) -> Result<Identity, AuthError>;

    /// Revoke the session server-side
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}
