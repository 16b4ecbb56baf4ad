//! Client identity modes
//!
//! A deployment runs either the single-step legacy client or the two-tier
//! blueprint/agent pairing. The mode is resolved once from configuration.

use std::fmt;

use tracing::debug;

use super::endpoint::{GRANT_CLIENT_CREDENTIALS, GrantParams, TokenEndpoint};
use crate::config::IdentityConfig;
use crate::{Error, Result};

/// Single-step client credentials
#[derive(Clone)]
pub struct LegacyIdentity {
    /// Client id
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
}

/// Blueprint credentials plus the dependent agent identity
#[derive(Clone)]
pub struct BlueprintIdentity {
    /// Parent blueprint application id
    pub blueprint_client_id: String,
    /// Parent blueprint secret
    pub blueprint_secret: String,
    /// Agent identity client id (no secret of its own)
    pub agent_client_id: String,
}

// Secrets stay out of Debug output so identities can be logged safely.
impl fmt::Debug for LegacyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyIdentity")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for BlueprintIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueprintIdentity")
            .field("blueprint_client_id", &self.blueprint_client_id)
            .field("agent_client_id", &self.agent_client_id)
            .finish_non_exhaustive()
    }
}

impl BlueprintIdentity {
    /// Mint a bootstrap token (T1) for the agent identity.
    ///
    /// T1 is only ever used as a `client_assertion` and is never cached.
    pub async fn bootstrap_token(
        &self,
        endpoint: &TokenEndpoint,
        exchange_scope: &str,
    ) -> Result<String> {
        let params = GrantParams::new(GRANT_CLIENT_CREDENTIALS)
            .with_secret(&self.blueprint_client_id, &self.blueprint_secret)
            .with("scope", exchange_scope)
            .with("fmi_path", self.agent_client_id.as_str());

        let response = endpoint.exchange(&params).await?;
        debug!(agent = %self.agent_client_id, "Minted bootstrap token");
        Ok(response.access_token)
    }
}

/// Active identity mode
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// One `client_credentials` grant with id and secret
    Legacy(LegacyIdentity),
    /// Bootstrap grant with blueprint credentials, then agent assertion grant
    Blueprint(BlueprintIdentity),
}

impl AuthMode {
    /// Pick the mode from configuration.
    ///
    /// Blueprint mode wins when blueprint id, blueprint secret and agent id
    /// are all set; otherwise the legacy id and secret must both be present.
    pub fn resolve(identity: &IdentityConfig) -> Result<Self> {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        let take = |v: &Option<String>| v.as_deref().unwrap_or_default().trim().to_string();

        if set(&identity.blueprint_client_id)
            && set(&identity.blueprint_secret)
            && set(&identity.agent_client_id)
        {
            return Ok(Self::Blueprint(BlueprintIdentity {
                blueprint_client_id: take(&identity.blueprint_client_id),
                blueprint_secret: take(&identity.blueprint_secret),
                agent_client_id: take(&identity.agent_client_id),
            }));
        }

        if set(&identity.client_id) && set(&identity.client_secret) {
            return Ok(Self::Legacy(LegacyIdentity {
                client_id: take(&identity.client_id),
                client_secret: take(&identity.client_secret),
            }));
        }

        Err(Error::AuthNotConfigured(
            "set blueprint_client_id, blueprint_secret and agent_client_id, \
             or client_id and client_secret"
                .to_string(),
        ))
    }

    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Legacy(_) => "legacy",
            Self::Blueprint(_) => "blueprint",
        }
    }

    /// Blueprint identity, when in blueprint mode
    #[must_use]
    pub fn blueprint(&self) -> Option<&BlueprintIdentity> {
        match self {
            Self::Blueprint(b) => Some(b),
            Self::Legacy(_) => None,
        }
    }
}
