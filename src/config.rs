//! Configuration management
//!
//! Sources, lowest precedence first: YAML file, the flat variable names used
//! by existing deployments (`GRAPH_TENANT_ID`, `TOKEN_STORAGE_URL`, ...), and
//! `OBO_BROKER_`-prefixed variables with `__` as the nesting separator.

use std::{path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::oauth::{AuthMode, DEFAULT_TIMEOUT};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files loaded into the process environment before
    /// extraction. Paths support ~ expansion; missing files are skipped.
    pub env_files: Vec<String>,
    /// OAuth client identities
    pub identity: IdentityConfig,
    /// Identity provider endpoints
    pub provider: ProviderConfig,
    /// Requested scopes
    pub scopes: ScopeConfig,
    /// Callback server settings
    pub callback: CallbackConfig,
    /// Durable delegated-token storage
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: vec![".env".to_string()],
            identity: IdentityConfig::default(),
            provider: ProviderConfig::default(),
            scopes: ScopeConfig::default(),
            callback: CallbackConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Client identities. Which ones are present selects the [`AuthMode`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Directory (tenant) id
    pub tenant_id: Option<String>,
    /// Legacy single-step client id
    pub client_id: Option<String>,
    /// Legacy single-step client secret
    pub client_secret: Option<String>,
    /// Blueprint application id
    pub blueprint_client_id: Option<String>,
    /// Blueprint secret
    pub blueprint_secret: Option<String>,
    /// Agent identity client id
    pub agent_client_id: Option<String>,
    /// Reserved: separate delegated client id
    pub delegated_client_id: Option<String>,
    /// Reserved: separate delegated client secret
    pub delegated_client_secret: Option<String>,
}

/// Identity provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Authority host, without tenant
    pub authority: String,
    /// Per-request timeout for token endpoint and storage calls (seconds)
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authority: "https://login.microsoftonline.com".to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// Scopes requested by each grant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// App-only resource scope
    pub app: String,
    /// Scope of the bootstrap (T1) grant
    pub exchange: String,
    /// Delegated resource scope
    pub delegated: String,
    /// Scope of the app-only token taken after a consent-only redirect
    pub consent_fallback: String,
    /// Override for the `/authorize` scope (default: delegated + `offline_access`)
    pub authorize: Option<String>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            app: "https://graph.microsoft.com/.default".to_string(),
            exchange: "api://AzureADTokenExchange/.default".to_string(),
            delegated: "https://graph.microsoft.com/Calendars.Read".to_string(),
            consent_fallback: "https://graph.microsoft.com/.default".to_string(),
            authorize: None,
        }
    }
}

impl ScopeConfig {
    /// Delegated scope plus `offline_access`, so a refresh token is issued
    #[must_use]
    pub fn delegated_offline(&self) -> String {
        format!("{} offline_access", self.delegated)
    }

    /// Scope sent to `/authorize`
    #[must_use]
    pub fn authorize_scope(&self) -> String {
        self.authorize
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.delegated_offline())
    }
}

/// Callback server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of the callback server, as registered with the provider
    pub redirect_base_url: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5050,
            redirect_base_url: "http://localhost:5050".to_string(),
        }
    }
}

impl CallbackConfig {
    fn base(&self) -> &str {
        self.redirect_base_url.trim_end_matches('/')
    }

    /// `redirect_uri` registered with the provider
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("{}/callback", self.base())
    }

    /// URL a human opens to start sign-in
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/login", self.base())
    }
}

/// Durable storage location. A cloud URL takes precedence over the local path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Blob URL including SAS token
    pub url: Option<String>,
    /// Local token file
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured cloud URL, ignoring blanks
    #[must_use]
    pub fn cloud_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    /// Local token file, defaulting to `~/.obo-broker/delegated-token.json`
    #[must_use]
    pub fn token_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".obo-broker")
                .join("delegated-token.json")
        })
    }
}

/// Flat variable names accepted for compatibility with existing deployments
const FLAT_ENV_KEYS: &[(&str, &str)] = &[
    ("GRAPH_TENANT_ID", "identity.tenant_id"),
    ("GRAPH_CLIENT_ID", "identity.client_id"),
    ("GRAPH_CLIENT_SECRET", "identity.client_secret"),
    ("GRAPH_BLUEPRINT_CLIENT_ID", "identity.blueprint_client_id"),
    ("GRAPH_BLUEPRINT_SECRET", "identity.blueprint_secret"),
    ("GRAPH_AGENT_CLIENT_ID", "identity.agent_client_id"),
    ("GRAPH_DELEGATED_CLIENT_ID", "identity.delegated_client_id"),
    ("GRAPH_DELEGATED_CLIENT_SECRET", "identity.delegated_client_secret"),
    ("AUTH_REDIRECT_BASE_URL", "callback.redirect_base_url"),
    ("TOKEN_STORAGE_URL", "storage.url"),
    ("TOKEN_CACHE_PATH", "storage.path"),
];

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
        }

        let config = Self::extract(path)?;

        // Env files may carry the credentials themselves, so extract again
        if config.load_env_files() {
            return Self::extract(path);
        }
        Ok(config)
    }

    fn extract(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment
            .merge(Env::raw().filter_map(|key| {
                FLAT_ENV_KEYS
                    .iter()
                    .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                    .map(|(_, nested)| (*nested).into())
            }))
            .merge(Env::prefixed("OBO_BROKER_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Load environment files into the process environment.
    /// Returns whether any file was loaded.
    fn load_env_files(&self) -> bool {
        let mut loaded = false;
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                        loaded = true;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
        loaded
    }

    fn tenant(&self) -> Result<&str> {
        self.identity
            .tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::AuthNotConfigured("tenant_id is not set".to_string()))
    }

    fn authority(&self) -> &str {
        self.provider.authority.trim_end_matches('/')
    }

    /// Tenant token endpoint
    pub fn token_url(&self) -> Result<String> {
        Ok(format!("{}/{}/oauth2/v2.0/token", self.authority(), self.tenant()?))
    }

    /// Tenant authorize endpoint
    pub fn authorize_url(&self) -> Result<String> {
        Ok(format!("{}/{}/oauth2/v2.0/authorize", self.authority(), self.tenant()?))
    }

    /// Per-request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs.max(1))
    }

    /// Resolve the active identity mode
    pub fn auth_mode(&self) -> Result<AuthMode> {
        self.tenant()?;
        AuthMode::resolve(&self.identity)
    }

    /// Names of the variables still missing for the interactive flow
    #[must_use]
    pub fn missing_for_interactive(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        let id = &self.identity;
        [
            ("GRAPH_TENANT_ID", &id.tenant_id),
            ("GRAPH_BLUEPRINT_CLIENT_ID", &id.blueprint_client_id),
            ("GRAPH_BLUEPRINT_SECRET", &id.blueprint_secret),
            ("GRAPH_AGENT_CLIENT_ID", &id.agent_client_id),
        ]
        .into_iter()
        .filter(|(_, v)| blank(v))
        .map(|(name, _)| name)
        .collect()
    }
}
