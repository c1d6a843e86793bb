use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Could not determine {0} directory")]
    DirNotFound(&'static str),
}

/// Application configuration, read from `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub ingredients: IngredientsConfig,
}

/// Remote table store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Project base URL (e.g., "https://project.supabase.co")
    pub url: String,
    /// Public anon key sent as `apikey`
    pub anon_key: String,
    /// Shared list table
    pub table: String,
    pub schema: String,
    /// Realtime channel name
    pub channel: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            table: "grocery_items".to_string(),
            schema: "public".to_string(),
            channel: "grocery_changes".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Identity provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OAuth provider used by `login` without a password
    pub provider: String,
    /// Local port for the OAuth redirect (0 picks a free port)
    pub callback_port: u16,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            callback_port: 54321,
        }
    }
}

/// Ingredient extraction service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngredientsConfig {
    pub base_url: String,
}

impl Default for IngredientsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

pub const ENV_STORE_URL: &str = "SHOPLIST_SUPABASE_URL";
pub const ENV_ANON_KEY: &str = "SHOPLIST_SUPABASE_ANON_KEY";
pub const ENV_INGREDIENTS_URL: &str = "SHOPLIST_INGREDIENTS_URL";

impl AppConfig {
    /// Default config file location (`~/.config/shoplist/config.toml` on Linux)
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join("shoplist").join("config.toml"))
            .ok_or(ConfigError::DirNotFound("config"))
    }

    /// Directory for the persisted auth session
    pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
        dirs::data_local_dir()
            .map(|p| p.join("shoplist"))
            .ok_or(ConfigError::DirNotFound("data"))
    }

    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(data)?)
    }

    /// Load config from `path` (or the default location), apply environment
    /// overrides and validate. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            log::debug!("Loading config from {}", path.display());
            Self::from_toml_str(&std::fs::read_to_string(&path)?)?
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides; empty values are ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_STORE_URL) {
            self.store.url = url;
        }
        if let Some(key) = get(ENV_ANON_KEY) {
            self.store.anon_key = key;
        }
        if let Some(url) = get(ENV_INGREDIENTS_URL) {
            self.ingredients.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.url.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "store.url is not set (config file or {})",
                ENV_STORE_URL
            )));
        }
        if !is_http_url(&self.store.url) {
            return Err(ConfigError::Invalid(
                "store.url must start with http:// or https://".to_string(),
            ));
        }
        if self.store.anon_key.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "store.anon_key is not set (config file or {})",
                ENV_ANON_KEY
            )));
        }
        if self.store.table.trim().is_empty() {
            return Err(ConfigError::Invalid("store.table must not be empty".to_string()));
        }
        if !is_http_url(&self.ingredients.base_url) {
            return Err(ConfigError::Invalid(
                "ingredients.base_url must start with http:// or https://".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [store]
            url = "https://proj.supabase.co"
            anon_key = "anon"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.table, "grocery_items");
        assert_eq!(config.store.channel, "grocery_changes");
        assert_eq!(config.store.request_timeout_secs, 30);
        assert_eq!(config.auth.provider, "google");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_STORE_URL, "http://127.0.0.1:54321"),
            (ENV_ANON_KEY, "local-key"),
            (ENV_INGREDIENTS_URL, "  "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.store.url, "http://127.0.0.1:54321");
        assert_eq!(config.store.anon_key, "local-key");
        // Blank override is ignored
        assert_eq!(config.ingredients.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_validation_errors() {
        let config = AppConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.store.url = "proj.supabase.co".to_string();
        config.store.anon_key = "anon".to_string();
        assert!(config.validate().is_err());

        config.store.url = "https://proj.supabase.co".to_string();
        config.store.anon_key = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[store]\nurl = \"https://proj.supabase.co\"\nanon_key = \"anon\"\ntable = \"list\"\n",
        )
        .unwrap();

        // Environment overrides may be present on the host; only assert on
        // fields without an override
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.store.table, "list");
    }
}
