//! Composition root
//!
//! [`TokenBroker`] owns one instance of every component and cache for the
//! process lifetime. Callers use two entry points: [`TokenBroker::app_token`]
//! and [`TokenBroker::delegated_token`].

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::oauth::{
    AppTokenAcquirer, AuthMode, CallbackService, CallbackSettings, Capability, DelegatedRefresher,
    DelegatedTokenStore, TokenArrivalPoller, TokenBackend, TokenEndpoint, backend_from_config,
};
use crate::{Error, Result};

/// Token subsystem wired from configuration
pub struct TokenBroker {
    endpoint: Arc<TokenEndpoint>,
    app: Arc<AppTokenAcquirer>,
    delegated: DelegatedTokenStore,
    backend: Arc<dyn TokenBackend>,
    callback_settings: CallbackSettings,
}

impl TokenBroker {
    /// Build from configuration, with the storage backend it selects
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = backend_from_config(config)?;
        Self::with_backend(config, backend)
    }

    /// Build from configuration with an explicit storage backend
    pub fn with_backend(config: &Config, backend: Arc<dyn TokenBackend>) -> Result<Self> {
        let mode = config.auth_mode()?;
        let endpoint = Arc::new(TokenEndpoint::new(config.token_url()?, config.timeout())?);

        let app = Arc::new(AppTokenAcquirer::new(
            Arc::clone(&endpoint),
            mode.clone(),
            config.scopes.clone(),
        ));

        let refresher = mode.blueprint().map(|identity| {
            DelegatedRefresher::new(Arc::clone(&endpoint), identity.clone(), config.scopes.clone())
        });

        let delegated = DelegatedTokenStore::new(
            Arc::clone(&app),
            refresher,
            Arc::clone(&backend),
            config.callback.login_url(),
        );

        let callback_settings = CallbackSettings {
            authorize_url: config.authorize_url()?,
            redirect_uri: config.callback.redirect_uri(),
            scopes: config.scopes.clone(),
        };

        info!(mode = mode.name(), backend = backend.name(), "Token broker ready");

        Ok(Self {
            endpoint,
            app,
            delegated,
            backend,
            callback_settings,
        })
    }

    /// Active identity mode
    #[must_use]
    pub fn mode(&self) -> &AuthMode {
        self.app.mode()
    }

    /// Application token for `capability`
    pub async fn app_token(&self, capability: Capability) -> Result<String> {
        self.app.get_app_token(capability).await
    }

    /// Delegated token, or [`Error::InteractiveAuthRequired`]
    pub async fn delegated_token(&self) -> Result<String> {
        self.delegated.get_delegated_token().await
    }

    /// Forget the in-memory delegated token so durable storage is re-read
    pub fn clear_delegated_cache(&self) {
        self.delegated.clear_delegated_cache();
    }

    /// Durable delegated-token backend
    #[must_use]
    pub fn backend(&self) -> Arc<dyn TokenBackend> {
        Arc::clone(&self.backend)
    }

    /// Poller over the same durable backend
    #[must_use]
    pub fn poller(&self) -> TokenArrivalPoller {
        TokenArrivalPoller::new(self.backend())
    }

    /// Callback handler writing into the same durable backend.
    /// Only available in blueprint mode.
    pub fn callback_service(&self) -> Result<CallbackService> {
        let identity = self.mode().blueprint().cloned().ok_or_else(|| {
            Error::AuthNotConfigured(
                "interactive sign-in needs blueprint_client_id, blueprint_secret and agent_client_id"
                    .to_string(),
            )
        })?;
        Ok(CallbackService::new(
            Arc::clone(&self.endpoint),
            identity,
            self.backend(),
            self.callback_settings.clone(),
        ))
    }
}
