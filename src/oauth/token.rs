//! Token model and per-category in-memory caches

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Safety margin applied to every validity check
pub const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Lifetime assumed when the provider omits `expires_in`
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Current time as fractional Unix seconds
#[must_use]
pub fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// An access token with its absolute expiry.
///
/// The serde form is also the durable record written to file or blob storage:
/// `{"access_token": "...", "refresh_token": "...", "expires_at": 1700000000.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Access token
    pub access_token: String,

    /// Refresh token, empty when the grant issued none
    #[serde(default)]
    pub refresh_token: String,

    /// Expiration time (Unix seconds)
    pub expires_at: f64,
}

impl Token {
    /// Build a token issued at `issued_at` that lives for `expires_in` seconds
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        issued_at: f64,
        expires_in: Option<u64>,
    ) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let ttl = expires_in.unwrap_or(DEFAULT_EXPIRES_IN) as f64;
        Self {
            access_token,
            refresh_token: refresh_token.unwrap_or_default(),
            expires_at: issued_at + ttl,
        }
    }

    /// Valid iff `now < expires_at - 60s`
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_unix())
    }

    /// Validity check against an explicit clock reading
    #[must_use]
    pub fn is_valid_at(&self, now: f64) -> bool {
        !self.access_token.is_empty() && now < self.expires_at - EXPIRY_SKEW.as_secs_f64()
    }

    /// Whether a refresh grant can be attempted
    #[must_use]
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Time until expiration
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let remaining = self.expires_at - now_unix();
        (remaining > 0.0).then(|| Duration::from_secs_f64(remaining))
    }
}

/// Token category, one cache each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    /// App-only token from the single-step legacy client
    AppLegacy,
    /// App-only token from the blueprint/agent exchange
    AppBlueprint,
    /// User-context token
    Delegated,
}

impl TokenCategory {
    /// Label used in log fields
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppLegacy => "app/legacy",
            Self::AppBlueprint => "app/blueprint",
            Self::Delegated => "delegated",
        }
    }
}

impl std::fmt::Display for TokenCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest token for one category.
///
/// Readers and writers take the lock only for the copy in or out, never
/// across an await point. Concurrent acquisitions may race; the last write wins.
#[derive(Debug)]
pub struct TokenCache {
    category: TokenCategory,
    current: RwLock<Option<Token>>,
    loaded: AtomicBool,
}

impl TokenCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(category: TokenCategory) -> Self {
        Self {
            category,
            current: RwLock::new(None),
            loaded: AtomicBool::new(false),
        }
    }

    /// Category this cache holds
    #[must_use]
    pub fn category(&self) -> TokenCategory {
        self.category
    }

    /// Cached access token if still valid
    pub fn valid_access_token(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .filter(|t| t.is_valid())
            .map(|t| t.access_token.clone())
    }

    /// Snapshot of the cached token, valid or not
    pub fn snapshot(&self) -> Option<Token> {
        self.current.read().clone()
    }

    /// Replace the cached token
    pub fn store(&self, token: Token) {
        *self.current.write() = Some(token);
    }

    /// Replace the cached token with one read from durable storage
    pub fn store_loaded(&self, token: Option<Token>) {
        *self.current.write() = token;
        self.loaded.store(true, Ordering::Release);
    }

    /// Whether durable storage has been read since start or the last clear
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Drop in-memory state so the next read goes back to durable storage
    pub fn clear(&self) {
        *self.current.write() = None;
        self.loaded.store(false, Ordering::Release);
    }
}
