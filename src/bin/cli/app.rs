use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::task::JoinHandle;

use shoplist_lib::auth::{AuthSession, GoTrueClient, Identity, SessionStore};
use shoplist_lib::config::AppConfig;
use shoplist_lib::ingredients::IngredientClient;
use shoplist_lib::list::ListSynchronizer;
use shoplist_lib::store::{MemoryStore, PostgrestClient, RemoteStore};

/// Author recorded on items added with `--offline`
const OFFLINE_AUTHOR: &str = "offline";

const TOKEN_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state for CLI commands
pub struct App {
    pub config: AppConfig,
    pub sync: Arc<ListSynchronizer>,
    /// `None` with `--offline`
    pub auth: Option<Arc<AuthSession>>,
    postgrest: Option<Arc<PostgrestClient>>,
}

impl App {
    /// Load config, restore the stored session and wire the synchronizer to
    /// the server (or to an in-memory store when `offline`)
    pub async fn new(config_path: Option<&Path>, offline: bool) -> Result<Self> {
        if offline {
            let config = AppConfig::default();
            let store: Arc<dyn RemoteStore> = Arc::new(MemoryStore::new());
            let sync = Arc::new(ListSynchronizer::new(store, config.store.table.clone()));
            return Ok(Self {
                config,
                sync,
                auth: None,
                postgrest: None,
            });
        }

        let config = AppConfig::load(config_path).context("Failed to load config")?;

        let postgrest = Arc::new(
            PostgrestClient::new(&config.store).context("Failed to create store client")?,
        );
        let provider = Arc::new(
            GoTrueClient::new(&config.store).context("Failed to create auth client")?,
        );
        let data_dir = AppConfig::default_data_dir().context("Failed to get data directory")?;
        let auth = Arc::new(AuthSession::new(provider, SessionStore::new(data_dir)));

        if let Err(e) = auth.restore().await {
            log::warn!("Could not restore session: {}", e);
        }
        postgrest.set_access_token(auth.access_token());

        let store: Arc<dyn RemoteStore> = postgrest.clone();
        let sync = Arc::new(ListSynchronizer::new(store, config.store.table.clone()));

        Ok(Self {
            config,
            sync,
            auth: Some(auth),
            postgrest: Some(postgrest),
        })
    }

    pub fn is_offline(&self) -> bool {
        self.auth.is_none()
    }

    pub fn auth(&self) -> Result<&Arc<AuthSession>> {
        match &self.auth {
            Some(auth) => Ok(auth),
            None => bail!("Not available with --offline"),
        }
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.auth.as_ref().and_then(|a| a.current_user())
    }

    /// Name recorded as `added_by`; the list is only reachable when signed in
    pub fn author(&self) -> Result<String> {
        if self.is_offline() {
            return Ok(OFFLINE_AUTHOR.to_string());
        }
        match self.current_user() {
            Some(user) => Ok(user.label().to_string()),
            None => bail!("Not signed in. Run `shoplist login` first."),
        }
    }

    /// Push the session's access token into the store client
    pub fn apply_session(&self) {
        if let (Some(auth), Some(postgrest)) = (&self.auth, &self.postgrest) {
            postgrest.set_access_token(auth.access_token());
        }
    }

    /// Keep the access token fresh for long-running views
    pub fn spawn_token_refresh(&self) -> Option<JoinHandle<()>> {
        let auth = self.auth.clone()?;
        let postgrest = self.postgrest.clone()?;

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TOKEN_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                match auth.ensure_fresh().await {
                    Ok(()) => postgrest.set_access_token(auth.access_token()),
                    Err(e) => {
                        log::warn!("Session refresh failed: {}", e);
                        postgrest.set_access_token(auth.access_token());
                    }
                }
            }
        }))
    }

    pub fn ingredients(&self) -> Result<IngredientClient> {
        IngredientClient::new(&self.config.ingredients)
            .context("Failed to create ingredient client")
    }

    pub fn access_token(&self) -> Option<String> {
        self.auth.as_ref().and_then(|a| a.access_token())
    }
}
