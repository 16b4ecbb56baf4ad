//! Token endpoint client
//!
//! One form-encoded POST per grant against the identity provider's
//! `/oauth2/v2.0/token` endpoint. No retries: callers own the fallback order.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::token::{Token, now_unix};
use crate::{Error, Result};

/// `grant_type=client_credentials`
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
/// `grant_type=authorization_code`
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
/// `grant_type=refresh_token`
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
/// `grant_type` for the on-behalf-of exchange
pub const GRANT_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// `client_assertion_type` for a token used as client credential
pub const CLIENT_ASSERTION_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Form parameters for one grant request
#[derive(Debug, Clone, Default)]
pub struct GrantParams(BTreeMap<&'static str, String>);

impl GrantParams {
    /// Start a request for `grant_type`
    #[must_use]
    pub fn new(grant_type: &str) -> Self {
        Self::default().with("grant_type", grant_type)
    }

    /// Add or replace a parameter
    #[must_use]
    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    /// Authenticate as `client_id` with a shared secret
    #[must_use]
    pub fn with_secret(self, client_id: &str, client_secret: &str) -> Self {
        self.with("client_id", client_id)
            .with("client_secret", client_secret)
    }

    /// Authenticate as `client_id` using another token as the client assertion
    #[must_use]
    pub fn with_assertion(self, client_id: &str, assertion: &str) -> Self {
        self.with("client_id", client_id)
            .with("client_assertion_type", CLIENT_ASSERTION_JWT_BEARER)
            .with("client_assertion", assertion)
    }

    /// Look up a parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn grant_type(&self) -> &str {
        self.get("grant_type").unwrap_or_default()
    }
}

/// Successful token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token, when issued
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert to a [`Token`] with absolute expiry from the request time
    #[must_use]
    pub fn into_token(self, issued_at: f64) -> Token {
        Token::issued(self.access_token, self.refresh_token, issued_at, self.expires_in)
    }
}

/// Stateless client for one tenant's token endpoint
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    http_client: Client,
    token_url: String,
}

impl TokenEndpoint {
    /// Create an endpoint client with its own HTTP client and timeout
    pub fn new(token_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http_client, token_url))
    }

    /// Create an endpoint client around an existing HTTP client
    #[must_use]
    pub fn with_client(http_client: Client, token_url: impl Into<String>) -> Self {
        Self {
            http_client,
            token_url: token_url.into(),
        }
    }

    /// Token endpoint URL
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Perform one grant request
    pub async fn exchange(&self, params: &GrantParams) -> Result<TokenResponse> {
        let grant_type = params.grant_type();
        debug!(grant_type, "Token endpoint request");

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params.0)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = Error::exchange_failed(status.as_u16(), &body);
            warn!(
                grant_type,
                status = status.as_u16(),
                error = %err,
                "Token endpoint rejected grant"
            );
            return Err(err);
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Transport(format!("Failed to parse token response: {e}")))
    }

    /// Perform one grant request and stamp the result with its request time
    pub async fn exchange_token(&self, params: &GrantParams) -> Result<Token> {
        let issued_at = now_unix();
        Ok(self.exchange(params).await?.into_token(issued_at))
    }
}
