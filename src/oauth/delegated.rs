//! Delegated (user-context) token store
//!
//! Decides between cached token, durable record, refresh, and interactive
//! sign-in. Every path ends in either a valid token or
//! [`Error::InteractiveAuthRequired`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::app_token::{AppTokenAcquirer, Capability};
use super::refresh::DelegatedRefresher;
use super::storage::{SaveOutcome, TokenBackend, persist};
use super::token::{Token, TokenCache, TokenCategory};
use crate::{Error, Result};

/// Delegated token access for one deployment
pub struct DelegatedTokenStore {
    app: Arc<AppTokenAcquirer>,
    refresher: Option<DelegatedRefresher>,
    backend: Arc<dyn TokenBackend>,
    cache: TokenCache,
    login_url: String,
}

impl DelegatedTokenStore {
    /// Create a store. `refresher` is `None` in legacy mode, where delegated
    /// requests are served by the app token.
    pub fn new(
        app: Arc<AppTokenAcquirer>,
        refresher: Option<DelegatedRefresher>,
        backend: Arc<dyn TokenBackend>,
        login_url: impl Into<String>,
    ) -> Self {
        Self {
            app,
            refresher,
            backend,
            cache: TokenCache::new(TokenCategory::Delegated),
            login_url: login_url.into(),
        }
    }

    /// Get a valid delegated token, or learn that a human has to sign in
    pub async fn get_delegated_token(&self) -> Result<String> {
        let Some(refresher) = &self.refresher else {
            return self.app.get_app_token(Capability::Calendar).await;
        };

        if let Some(token) = self.cache.valid_access_token() {
            return Ok(token);
        }

        // Absent or expired in memory: the record may have been rewritten
        // out of band, so always go back to durable storage.
        let current = self.reload().await;
        if let Some(token) = current.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.access_token.clone());
        }

        if let Some(stale) = current.filter(Token::has_refresh_token) {
            match refresher.refresh(&stale).await {
                Ok(token) => {
                    // Cached only once the save contract is met
                    self.save(&token).await?;
                    let access_token = token.access_token.clone();
                    self.cache.store(token);
                    return Ok(access_token);
                }
                Err(e) => {
                    warn!(error = %e, "Delegated refresh failed; interactive sign-in required");
                }
            }
        }

        info!(auth_url = %self.login_url, "No usable delegated token");
        Err(Error::InteractiveAuthRequired {
            auth_url: self.login_url.clone(),
        })
    }

    /// Drop in-memory state so the next call re-reads durable storage
    pub fn clear_delegated_cache(&self) {
        self.cache.clear();
    }

    async fn reload(&self) -> Option<Token> {
        let first = !self.cache.is_loaded();
        let loaded = match self.backend.load().await {
            Ok(token) => token,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "Failed to load delegated token");
                None
            }
        };
        debug!(
            backend = self.backend.name(),
            first_load = first,
            found = loaded.is_some(),
            "Reloaded delegated token"
        );
        self.cache.store_loaded(loaded.clone());
        loaded
    }

    async fn save(&self, token: &Token) -> Result<()> {
        if let SaveOutcome::Failed(reason) = persist(self.backend.as_ref(), token).await? {
            debug!(%reason, "Refreshed token kept in memory only");
        }
        Ok(())
    }
}
