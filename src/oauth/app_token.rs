//! Application (app-only) token acquisition

use std::sync::Arc;

use tracing::{debug, info};

use super::endpoint::{GRANT_CLIENT_CREDENTIALS, GrantParams, TokenEndpoint};
use super::mode::AuthMode;
use super::token::{TokenCache, TokenCategory, now_unix};
use crate::Result;
use crate::config::ScopeConfig;

/// What the token is going to be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Mailbox access
    Mail,
    /// Calendar access
    Calendar,
}

impl Capability {
    /// Label used in log fields
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Calendar => "calendar",
        }
    }
}

/// Produces app-only tokens for either identity mode, caching the final
/// token per mode. Bootstrap tokens are never cached.
#[derive(Debug)]
pub struct AppTokenAcquirer {
    endpoint: Arc<TokenEndpoint>,
    mode: AuthMode,
    scopes: ScopeConfig,
    legacy: TokenCache,
    blueprint: TokenCache,
}

impl AppTokenAcquirer {
    /// Create an acquirer with empty caches
    #[must_use]
    pub fn new(endpoint: Arc<TokenEndpoint>, mode: AuthMode, scopes: ScopeConfig) -> Self {
        Self {
            endpoint,
            mode,
            scopes,
            legacy: TokenCache::new(TokenCategory::AppLegacy),
            blueprint: TokenCache::new(TokenCategory::AppBlueprint),
        }
    }

    /// Active identity mode
    #[must_use]
    pub fn mode(&self) -> &AuthMode {
        &self.mode
    }

    fn cache(&self) -> &TokenCache {
        match self.mode {
            AuthMode::Legacy(_) => &self.legacy,
            AuthMode::Blueprint(_) => &self.blueprint,
        }
    }

    /// Get a valid app token, from cache when possible
    pub async fn get_app_token(&self, capability: Capability) -> Result<String> {
        let cache = self.cache();
        if let Some(token) = cache.valid_access_token() {
            debug!(
                category = %cache.category(),
                capability = capability.as_str(),
                "App token cache hit"
            );
            return Ok(token);
        }

        let issued_at = now_unix();
        let response = match &self.mode {
            AuthMode::Legacy(identity) => {
                let params = GrantParams::new(GRANT_CLIENT_CREDENTIALS)
                    .with_secret(&identity.client_id, &identity.client_secret)
                    .with("scope", self.scopes.app.as_str());
                self.endpoint.exchange(&params).await?
            }
            AuthMode::Blueprint(identity) => {
                let t1 = identity
                    .bootstrap_token(&self.endpoint, &self.scopes.exchange)
                    .await?;
                let params = GrantParams::new(GRANT_CLIENT_CREDENTIALS)
                    .with_assertion(&identity.agent_client_id, &t1)
                    .with("scope", self.scopes.app.as_str());
                self.endpoint.exchange(&params).await?
            }
        };

        let token = response.into_token(issued_at);
        let access_token = token.access_token.clone();
        info!(
            category = %cache.category(),
            capability = capability.as_str(),
            expires_in = ?token.time_until_expiry(),
            "Acquired app token"
        );
        cache.store(token);
        Ok(access_token)
    }
}
