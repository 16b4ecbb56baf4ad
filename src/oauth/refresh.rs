//! Delegated token refresh
//!
//! Deployments of the blueprint/agent pairing differ in how they accept a
//! refresh grant. The agent-assertion form is tried first, then the
//! blueprint's own secret.

use std::sync::Arc;

use tracing::{info, warn};

use super::endpoint::{GRANT_REFRESH_TOKEN, GrantParams, TokenEndpoint};
use super::mode::BlueprintIdentity;
use super::token::Token;
use crate::Result;
use crate::config::ScopeConfig;

/// Turns a stored refresh token into a fresh delegated token
#[derive(Debug, Clone)]
pub struct DelegatedRefresher {
    endpoint: Arc<TokenEndpoint>,
    identity: BlueprintIdentity,
    scopes: ScopeConfig,
}

impl DelegatedRefresher {
    /// Create a refresher for the blueprint identity
    #[must_use]
    pub fn new(
        endpoint: Arc<TokenEndpoint>,
        identity: BlueprintIdentity,
        scopes: ScopeConfig,
    ) -> Self {
        Self {
            endpoint,
            identity,
            scopes,
        }
    }

    /// Refresh `current`. A rotated refresh token replaces the old one; when
    /// the provider omits it, the previous refresh token is kept.
    pub async fn refresh(&self, current: &Token) -> Result<Token> {
        let scope = self.scopes.delegated_offline();

        let t1 = self
            .identity
            .bootstrap_token(&self.endpoint, &self.scopes.exchange)
            .await?;

        let with_assertion = GrantParams::new(GRANT_REFRESH_TOKEN)
            .with_assertion(&self.identity.agent_client_id, &t1)
            .with("refresh_token", current.refresh_token.as_str())
            .with("scope", scope.as_str());

        let mut token = match self.endpoint.exchange_token(&with_assertion).await {
            Ok(token) => {
                info!(form = "agent_assertion", "Delegated token refreshed");
                token
            }
            Err(e) if e.is_rejection() => {
                warn!(error = %e, "Assertion refresh rejected; trying blueprint secret");
                let with_secret = GrantParams::new(GRANT_REFRESH_TOKEN)
                    .with_secret(
                        &self.identity.blueprint_client_id,
                        &self.identity.blueprint_secret,
                    )
                    .with("refresh_token", current.refresh_token.as_str())
                    .with("scope", scope.as_str());
                let token = self.endpoint.exchange_token(&with_secret).await?;
                info!(form = "blueprint_secret", "Delegated token refreshed");
                token
            }
            Err(e) => return Err(e),
        };

        if !token.has_refresh_token() {
            token.refresh_token.clone_from(&current.refresh_token);
        }
        Ok(token)
    }
}
