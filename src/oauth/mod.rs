//! Delegated-identity OAuth 2.0 token exchange
//!
//! Features:
//! - Client-credentials app tokens (legacy client or blueprint/agent pairing)
//! - Delegated tokens with durable storage and refresh-token renewal
//! - Browser authorization-code flow with on-behalf-of exchange
//! - Polling bridge for processes that cannot host the callback server

mod app_token;
mod callback;
mod delegated;
mod endpoint;
mod mode;
mod poller;
mod refresh;
mod storage;
mod token;

pub use app_token::{AppTokenAcquirer, Capability};
pub use callback::{
    CallbackOutcome, CallbackParams, CallbackServer, CallbackService, CallbackSettings, router,
};
pub use delegated::DelegatedTokenStore;
pub use endpoint::{
    CLIENT_ASSERTION_JWT_BEARER, DEFAULT_TIMEOUT, GRANT_AUTHORIZATION_CODE,
    GRANT_CLIENT_CREDENTIALS, GRANT_JWT_BEARER, GRANT_REFRESH_TOKEN, GrantParams, TokenEndpoint,
    TokenResponse,
};
pub use mode::{AuthMode, BlueprintIdentity, LegacyIdentity};
pub use poller::{DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL, TokenArrivalPoller};
pub use refresh::DelegatedRefresher;
pub use storage::{
    BlobTokenBackend, FileTokenBackend, MemoryTokenBackend, SaveOutcome, SavePolicy, TokenBackend,
    backend_from_config, persist,
};
pub use token::{EXPIRY_SKEW, Token, TokenCache, TokenCategory, now_unix};
