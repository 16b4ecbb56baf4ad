//! Authorization callback server
//!
//! Drives the authorization-code leg of the delegated flow:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/login` | 302 to the provider's `/authorize` with a fresh `state` |
//! | `GET` | `/callback` | Validate `state`, redeem `code`, run OBO, save the token |
//!
//! The handler is single-shot per sign-in: any failure requires a new
//! `/login`. [`CallbackServer::run_once`] serves until the first saved token;
//! [`CallbackServer::serve`] keeps serving for hosted deployments.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use parking_lot::Mutex;
use rand::RngExt;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use url::Url;

use super::endpoint::{
    GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS, GRANT_JWT_BEARER, GrantParams,
    TokenEndpoint,
};
use super::mode::BlueprintIdentity;
use super::storage::{SaveOutcome, TokenBackend, persist};
use super::token::Token;
use crate::config::ScopeConfig;
use crate::{Error, Result};

/// OAuth callback query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter (for CSRF protection)
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Terminal state of one callback
#[derive(Debug)]
pub enum CallbackOutcome {
    /// A token was saved to durable storage
    Success(Token),
    /// `state` did not match the outstanding nonce
    CsrfRejected,
    /// The provider redirected back with an error
    ErrorFromProvider {
        /// Provider error code
        error: String,
        /// Provider error description
        description: String,
    },
    /// Code redemption, fallback acquisition, or saving failed
    ExchangeFailed(String),
}

impl CallbackOutcome {
    /// HTTP status reported to the browser
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Success(_) => StatusCode::OK,
            Self::CsrfRejected | Self::ErrorFromProvider { .. } => StatusCode::BAD_REQUEST,
            Self::ExchangeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn page(&self) -> String {
        match self {
            Self::Success(_) => success_page(),
            Self::CsrfRejected => error_page(
                "state_mismatch",
                &format!("{}. Start again from /login.", Error::CsrfRejected),
            ),
            Self::ErrorFromProvider { error, description } => error_page(error, description),
            Self::ExchangeFailed(reason) => error_page("token_exchange_failed", reason),
        }
    }
}

/// Endpoint settings for the authorization-code flow
#[derive(Debug, Clone)]
pub struct CallbackSettings {
    /// Provider `/authorize` URL
    pub authorize_url: String,
    /// Registered `redirect_uri` (`<base>/callback`)
    pub redirect_uri: String,
    /// Requested scopes
    pub scopes: ScopeConfig,
}

/// Shared state behind the callback routes
pub struct CallbackService {
    endpoint: Arc<TokenEndpoint>,
    identity: BlueprintIdentity,
    backend: Arc<dyn TokenBackend>,
    settings: CallbackSettings,
    pending_state: Mutex<Option<String>>,
    saved: watch::Sender<Option<Token>>,
}

impl CallbackService {
    /// Create the service
    pub fn new(
        endpoint: Arc<TokenEndpoint>,
        identity: BlueprintIdentity,
        backend: Arc<dyn TokenBackend>,
        settings: CallbackSettings,
    ) -> Self {
        let (saved, _) = watch::channel(None);
        Self {
            endpoint,
            identity,
            backend,
            settings,
            pending_state: Mutex::new(None),
            saved,
        }
    }

    /// Issue a fresh nonce and build the `/authorize` redirect target.
    /// Any earlier nonce stops being accepted.
    pub fn begin_login(&self) -> Result<String> {
        let state = generate_state();

        let mut url = Url::parse(&self.settings.authorize_url)
            .map_err(|e| Error::Config(format!("Invalid authorize endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.identity.agent_client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", &self.settings.scopes.authorize_scope())
            .append_pair("state", &state)
            .append_pair("response_mode", "query");

        *self.pending_state.lock() = Some(state);
        info!("Issued authorization redirect");
        Ok(url.to_string())
    }

    /// Process one callback to a terminal outcome
    pub async fn complete(&self, params: CallbackParams) -> CallbackOutcome {
        if !self.accept_state(params.state.as_deref()) {
            warn!("Rejected callback with mismatched state");
            return CallbackOutcome::CsrfRejected;
        }

        if let Some(error) = params.error {
            let description = params.error_description.unwrap_or_default();
            error!(%error, %description, "Provider returned an authorization error");
            return CallbackOutcome::ErrorFromProvider { error, description };
        }

        let acquired = match params.code {
            Some(code) => self.exchange_code(&code).await,
            None => {
                info!("No code returned (consent-only); trying autonomous flow");
                self.consent_fallback().await
            }
        };

        let token = match acquired {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Token exchange failed");
                return CallbackOutcome::ExchangeFailed(e.to_string());
            }
        };

        match persist(self.backend.as_ref(), &token).await {
            Ok(SaveOutcome::Persisted) => {
                info!(backend = self.backend.name(), "Delegated token saved");
                self.saved.send_replace(Some(token.clone()));
                CallbackOutcome::Success(token)
            }
            Ok(SaveOutcome::Failed(reason)) => {
                CallbackOutcome::ExchangeFailed(format!("Failed to save token: {reason}"))
            }
            Err(e) => CallbackOutcome::ExchangeFailed(format!("Failed to save token: {e}")),
        }
    }

    /// Compare against the outstanding nonce and consume it on a match
    fn accept_state(&self, state: Option<&str>) -> bool {
        let mut pending = self.pending_state.lock();
        let matches = match (pending.as_deref(), state) {
            (Some(expected), Some(got)) => bool::from(expected.as_bytes().ct_eq(got.as_bytes())),
            _ => false,
        };
        if matches {
            *pending = None;
        }
        matches
    }

    /// Redeem the code, then try to trade the user token for an OBO token
    async fn exchange_code(&self, code: &str) -> Result<Token> {
        let user_token = self.redeem_code(code).await?;

        match self.on_behalf_of(&user_token).await {
            Ok(obo) => {
                info!("OBO exchange succeeded");
                Ok(obo)
            }
            Err(e) => {
                warn!(error = %e, "OBO exchange failed; saving direct token instead");
                Ok(user_token)
            }
        }
    }

    async fn redeem_code(&self, code: &str) -> Result<Token> {
        let scope = self.settings.scopes.delegated_offline();

        let with_secret = GrantParams::new(GRANT_AUTHORIZATION_CODE)
            .with_secret(&self.identity.blueprint_client_id, &self.identity.blueprint_secret)
            .with("code", code)
            .with("redirect_uri", self.settings.redirect_uri.as_str())
            .with("scope", scope.as_str());

        match self.endpoint.exchange_token(&with_secret).await {
            Ok(token) => Ok(token),
            Err(e) if e.is_rejection() => {
                warn!(
                    error = %e,
                    "Code redemption with blueprint secret failed; trying agent assertion"
                );
                let t1 = self.bootstrap().await?;
                let with_assertion = GrantParams::new(GRANT_AUTHORIZATION_CODE)
                    .with_assertion(&self.identity.agent_client_id, &t1)
                    .with("code", code)
                    .with("redirect_uri", self.settings.redirect_uri.as_str())
                    .with("scope", scope.as_str());
                self.endpoint.exchange_token(&with_assertion).await
            }
            Err(e) => Err(e),
        }
    }

    async fn on_behalf_of(&self, user_token: &Token) -> Result<Token> {
        let t1 = self.bootstrap().await?;
        let params = GrantParams::new(GRANT_JWT_BEARER)
            .with_assertion(&self.identity.agent_client_id, &t1)
            .with("assertion", user_token.access_token.as_str())
            .with("scope", self.settings.scopes.delegated.as_str())
            .with("requested_token_use", "on_behalf_of");
        self.endpoint.exchange_token(&params).await
    }

    /// App-only token via agent assertion, stored as a degraded delegated token
    async fn consent_fallback(&self) -> Result<Token> {
        let t1 = self.bootstrap().await?;
        let params = GrantParams::new(GRANT_CLIENT_CREDENTIALS)
            .with_assertion(&self.identity.agent_client_id, &t1)
            .with("scope", self.settings.scopes.consent_fallback.as_str());
        let mut token = self.endpoint.exchange_token(&params).await?;
        token.refresh_token.clear();
        Ok(token)
    }

    async fn bootstrap(&self) -> Result<String> {
        self.identity
            .bootstrap_token(&self.endpoint, &self.settings.scopes.exchange)
            .await
    }

    fn subscribe(&self) -> watch::Receiver<Option<Token>> {
        self.saved.subscribe()
    }
}

/// Routes for `/login` and `/callback`
pub fn router(service: Arc<CallbackService>) -> Router {
    Router::new()
        .route("/login", get(handle_login))
        .route("/callback", get(handle_callback))
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn handle_login(State(service): State<Arc<CallbackService>>) -> Response {
    match service.begin_login() {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to build authorization URL");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(error_page("configuration", "Authorization endpoint is misconfigured")),
            )
                .into_response()
        }
    }
}

async fn handle_callback(
    State(service): State<Arc<CallbackService>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    debug!(
        has_code = params.code.is_some(),
        has_error = params.error.is_some(),
        "Received OAuth callback"
    );
    let outcome = service.complete(params).await;
    (outcome.status(), Html(outcome.page())).into_response()
}

async fn handle_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(error_page("not_found", "Not found. Go to /login to start.")),
    )
        .into_response()
}

/// Callback HTTP server in its one-shot or hosted form
pub struct CallbackServer {
    service: Arc<CallbackService>,
}

impl CallbackServer {
    /// Wrap a service
    #[must_use]
    pub fn new(service: Arc<CallbackService>) -> Self {
        Self { service }
    }

    /// Bind the listener
    pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
        TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind callback server: {e}")))
    }

    /// Serve until the first token is saved, then shut down.
    ///
    /// Failed callbacks are answered and the server keeps waiting for a new
    /// `/login`. With `deadline`, gives up with [`Error::Timeout`].
    pub async fn run_once(
        self,
        listener: TcpListener,
        deadline: Option<Duration>,
    ) -> Result<Token> {
        let mut saved = self.service.subscribe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = router(Arc::clone(&self.service));
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|e| Error::Internal(format!("Callback server error: {e}")))
        });

        let wait = async {
            loop {
                if saved.changed().await.is_err() {
                    return Err(Error::Internal("Callback channel closed unexpectedly".to_string()));
                }
                if let Some(token) = saved.borrow_and_update().clone() {
                    return Ok(token);
                }
            }
        };

        let result = match deadline {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "no sign-in completed within {limit:?}"
                )))
            }),
            None => wait.await,
        };

        // Let the success page flush before the listener goes away
        let _ = shutdown_tx.send(());
        match tokio::time::timeout(Duration::from_secs(5), server).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "Callback server stopped with error"),
            Err(_) => warn!("Callback server did not stop in time"),
            _ => {}
        }

        result
    }

    /// Serve until Ctrl-C or SIGTERM
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "Callback server listening");
        axum::serve(listener, router(self.service))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("Callback server error: {e}")))
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

/// Generate a random state parameter
fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Successful</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
        }
        .container { text-align: center; padding: 2rem; }
        h1 { margin: 0 0 0.5rem 0; }
        p { margin: 0; opacity: 0.9; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Authorization Successful</h1>
        <p>You can close this tab and return to the agent.</p>
    </div>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str, description: &str) -> String {
    let error = escape_html(error);
    let description = escape_html(description);
    format!(r#"<!DOCTYPE html>
<html>
<head>
    <title>Authorization Failed</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
        }}
        .container {{ text-align: center; padding: 2rem; max-width: 480px; }}
        h1 {{ margin: 0 0 0.5rem 0; }}
        .error-code {{ font-family: monospace; margin-top: 1rem; opacity: 0.7; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Authorization Failed</h1>
        <p>{description}</p>
        <p class="error-code">Error: {error}</p>
    </div>
</body>
</html>"#)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_params_deserialize() {
        let params: CallbackParams =
            serde_urlencoded::from_str("code=abc123&state=xyz789").unwrap();

        assert_eq!(params.code, Some("abc123".to_string()));
        assert_eq!(params.state, Some("xyz789".to_string()));
        assert!(params.error.is_none());
    }

    #[test]
    fn state_is_base64url_safe() {
        for _ in 0..10 {
            let state = generate_state();
            assert!(!state.contains('+'));
            assert!(!state.contains('/'));
            assert!(!state.contains('='));
            // 16 random bytes -> 22 base64url chars
            assert_eq!(state.len(), 22);
        }
    }

    #[test]
    fn state_generates_unique_values() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn error_page_escapes_provider_text() {
        let page = error_page("access_denied", "<script>alert(1)</script>");
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }

    #[test]
    fn outcome_statuses() {
        assert_eq!(CallbackOutcome::CsrfRejected.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            CallbackOutcome::ErrorFromProvider {
                error: "access_denied".into(),
                description: String::new(),
            }
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CallbackOutcome::ExchangeFailed("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
